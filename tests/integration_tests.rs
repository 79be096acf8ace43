//! Integration tests for the gator feed aggregator
//!
//! These tests drive commands end to end: config file, SQLite database on
//! disk, and a mock HTTP server standing in for the feed source.

mod common {
    use gator::commands::{self, Command, CommandError, State};
    use gator::config::Config;
    use gator::db::Database;
    use gator::fetcher::FetchContext;
    use gator::store::EntityStore;
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub async fn create_state(temp_dir: &TempDir, config: Config) -> State<Database> {
        let db = Database::new(&create_db_path(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        let config_path = temp_dir.path().join("gator.toml");
        State::new(db, config, config_path).unwrap()
    }

    pub async fn run_command<S: EntityStore>(
        state: &mut State<S>,
        name: &str,
        args: &[&str],
    ) -> Result<String, CommandError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let command = Command::parse(name, &args)?;
        let mut out = Vec::new();
        commands::run(state, command, &FetchContext::background(), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }
}

#[cfg(test)]
mod session_integration_tests {
    use super::common::*;
    use gator::config::Config;
    use gator::store::EntityStore;

    #[tokio::test]
    async fn test_register_login_users_workflow() {
        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, Config::default()).await;

        run_command(&mut state, "register", &["kahya"]).await.unwrap();
        run_command(&mut state, "register", &["holgith"]).await.unwrap();

        // register logs the new user in
        let listing = run_command(&mut state, "users", &[]).await.unwrap();
        assert_eq!(listing, "* holgith (current)\n* kahya\n");

        run_command(&mut state, "login", &["kahya"]).await.unwrap();
        let listing = run_command(&mut state, "users", &[]).await.unwrap();
        assert_eq!(listing, "* holgith\n* kahya (current)\n");

        // the config file on disk follows the login
        let saved = Config::load(temp_dir.path().join("gator.toml")).unwrap();
        assert_eq!(saved.current_user_name, "kahya");
    }

    #[tokio::test]
    async fn test_current_user_survives_restart() {
        let temp_dir = create_temp_dir();

        {
            let mut state = create_state(&temp_dir, Config::default()).await;
            run_command(&mut state, "register", &["ballan"]).await.unwrap();
        }

        // Reopen with the config read back from disk
        let config = Config::load(temp_dir.path().join("gator.toml")).unwrap();
        let mut state = create_state(&temp_dir, config).await;
        let listing = run_command(&mut state, "users", &[]).await.unwrap();
        assert_eq!(listing, "* ballan (current)\n");
    }

    #[tokio::test]
    async fn test_reset_removes_users_and_their_feeds() {
        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, Config::default()).await;

        run_command(&mut state, "register", &["kahya"]).await.unwrap();
        run_command(&mut state, "addfeed", &["HN", "https://news.example/feed.xml"])
            .await
            .unwrap();

        run_command(&mut state, "reset", &[]).await.unwrap();

        assert_eq!(run_command(&mut state, "users", &[]).await.unwrap(), "");
        assert!(state
            .store
            .find_feeds_by_url("https://news.example/feed.xml")
            .await
            .unwrap()
            .is_empty());
    }
}

#[cfg(test)]
mod conflict_integration_tests {
    use super::common::*;
    use gator::commands::{CommandError, State};
    use gator::config::Config;
    use gator::db::Database;
    use gator::store::{EntityStore, Feed, NewFeed, NewUser, StoreError, User};

    /// Store whose existence checks come back empty, as if another process
    /// inserted the row between our check and our insert.
    struct StaleReads {
        db: Database,
        hide_users: bool,
    }

    impl EntityStore for StaleReads {
        async fn find_users_by_name(&self, name: &str) -> Result<Vec<User>, StoreError> {
            if self.hide_users {
                return Ok(Vec::new());
            }
            self.db.find_users_by_name(name).await
        }
        async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.db.create_user(user).await
        }
        async fn list_users(&self) -> Result<Vec<User>, StoreError> {
            self.db.list_users().await
        }
        async fn delete_all_users(&self) -> Result<u64, StoreError> {
            self.db.delete_all_users().await
        }
        async fn find_feeds_by_name(&self, _name: &str) -> Result<Vec<Feed>, StoreError> {
            Ok(Vec::new())
        }
        async fn find_feeds_by_url(&self, _url: &str) -> Result<Vec<Feed>, StoreError> {
            Ok(Vec::new())
        }
        async fn create_feed(&self, feed: NewFeed) -> Result<Feed, StoreError> {
            self.db.create_feed(feed).await
        }
    }

    async fn create_db(temp_dir: &tempfile::TempDir) -> Database {
        let db = Database::new(&create_db_path(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_register_race_reported_as_conflict() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        db.create_user(NewUser::new("kahya")).await.unwrap();

        let store = StaleReads {
            db,
            hide_users: true,
        };
        let config_path = temp_dir.path().join("gator.toml");
        let mut state = State::new(store, Config::default(), config_path).unwrap();

        let result = run_command(&mut state, "register", &["kahya"]).await;
        assert!(matches!(result, Err(CommandError::Conflict(_))));
        assert_eq!(state.store.list_users().await.unwrap().len(), 1);
        // a failed register leaves the current user alone
        assert_eq!(state.config.current_user_name, "lane");
    }

    #[tokio::test]
    async fn test_add_feed_race_on_url_reported_as_conflict() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let owner = db.create_user(NewUser::new("kahya")).await.unwrap();
        db.create_feed(NewFeed::new(owner.id, "HN", "https://news.example/feed.xml"))
            .await
            .unwrap();

        let store = StaleReads {
            db,
            hide_users: false,
        };
        let config = Config {
            current_user_name: "kahya".to_string(),
            ..Config::default()
        };
        let config_path = temp_dir.path().join("gator.toml");
        let mut state = State::new(store, config, config_path).unwrap();

        let result = run_command(
            &mut state,
            "addfeed",
            &["Hacker News", "https://news.example/feed.xml"],
        )
        .await;
        assert!(matches!(result, Err(CommandError::Conflict(_))));
        let stored = state
            .store
            .db
            .find_feeds_by_url("https://news.example/feed.xml")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "HN");
    }
}

#[cfg(test)]
mod agg_integration_tests {
    use super::common::*;
    use gator::commands::CommandError;
    use gator::config::Config;
    use gator::fetcher::FetchError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
            <channel>
                <title>Tech &amp;amp; News</title>
                <link>https://technews.example.com</link>
                <description>Latest tech news</description>
                <item>
                    <title>Breaking: Rust &amp;amp; Go &amp;lt;3</title>
                    <link>https://technews.example.com/article/1</link>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                </item>
                <item>
                    <title>Review: Latest Gadget</title>
                    <link>https://technews.example.com/article/2</link>
                    <pubDate>Mon, 09 Dec 2024 10:00:00 GMT</pubDate>
                </item>
            </channel>
        </rss>
    "#;

    fn config_for(server: &MockServer) -> Config {
        Config {
            agg_url: format!("{}/index.xml", server.uri()),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_agg_prints_decoded_item_titles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED_XML))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, config_for(&server)).await;

        let out = run_command(&mut state, "agg", &[]).await.unwrap();
        assert_eq!(out, "- Breaking: Rust & Go <3\n- Review: Latest Gadget\n");
    }

    #[tokio::test]
    async fn test_agg_404_is_status_error_not_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not xml at all <"))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, config_for(&server)).await;

        let result = run_command(&mut state, "agg", &[]).await;
        match result {
            Err(CommandError::Fetch(FetchError::Status(status))) => {
                assert_eq!(status.as_u16(), 404)
            }
            other => panic!("expected fetch status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agg_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel>"))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, config_for(&server)).await;

        let result = run_command(&mut state, "agg", &[]).await;
        assert!(matches!(result, Err(CommandError::Parse(_))));
    }

    #[tokio::test]
    async fn test_agg_prints_a_line_for_an_empty_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<rss><channel><item/><item><title>second</title></item></channel></rss>",
            ))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let mut state = create_state(&temp_dir, config_for(&server)).await;

        let out = run_command(&mut state, "agg", &[]).await.unwrap();
        assert_eq!(out, "- \n- second\n");
    }

    #[tokio::test]
    async fn test_agg_does_not_need_a_current_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED_XML))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let config = Config {
            current_user_name: String::new(),
            ..config_for(&server)
        };
        let mut state = create_state(&temp_dir, config).await;

        let out = run_command(&mut state, "agg", &[]).await.unwrap();
        assert_eq!(out.lines().count(), 2);
    }
}
