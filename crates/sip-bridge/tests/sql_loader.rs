//! Account pools backed by a SQLite database

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::uri;
use pretty_assertions::assert_eq;
use sipfork_sip_bridge::account::{AccountLoader, AccountPool, PoolSettings, SqlLoader};
use sipfork_sip_bridge::config::SqlLoaderConfig;
use sipfork_sip_bridge::{BridgeApplication, Credential, Error, ProvidersDocument};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};

const INIT_QUERY: &str = "SELECT usernameInDb as username, domain as hostport, userid as user_id, \
     \"clrtxt\" as secret_type, passwordInDb as secret, alias_username, alias_hostport, \
     outboundProxyInDb as outbound_proxy FROM users";

async fn create_database(path: &std::path::Path) {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    sqlx::query(
        "CREATE TABLE users (usernameInDb TEXT, domain TEXT, userid TEXT, passwordInDb TEXT, \
         alias_username TEXT, alias_hostport TEXT, outboundProxyInDb TEXT)",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO users VALUES \
         ('account1', 'some.provider.example.com', '', '', 'alias', 'sip.example.org', ''), \
         ('account2', 'some.provider.example.com', 'test-userID', 'clear text passphrase', '', '', 'sip.linphone.org'), \
         ('account3', 'some.provider.example.com', '', '', '', '', NULL)",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();
}

fn loader_config(path: &std::path::Path) -> SqlLoaderConfig {
    SqlLoaderConfig {
        db_backend: "sqlite3".into(),
        init_query: INIT_QUERY.into(),
        update_query: String::new(),
        connection: path.display().to_string(),
    }
}

#[tokio::test]
async fn loads_three_rows_with_optional_columns() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("accounts.db");
    create_database(&db).await;

    let loader = SqlLoader::new(loader_config(&db)).unwrap();
    let settings = PoolSettings {
        outbound_proxy: Some(uri("sip:127.0.0.1:5860;transport=tcp")),
        registration_required: false,
        max_calls_per_line: 2,
    };
    let pool = AccountPool::new("FlockOfJabirus", settings, None);
    let report = pool.load(&loader).await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(pool.len(), 3);

    let account1 = pool.get_account_by_uri(&uri("sip:account1@some.provider.example.com")).unwrap();
    assert_eq!(account1.alias(), Some(&uri("sip:alias@sip.example.org")));
    assert!(account1.credential().is_none());
    assert!(account1.user_id().is_none());
    // pool default applies without an override
    assert_eq!(account1.outbound_proxy(), Some(&uri("sip:127.0.0.1:5860;transport=tcp")));

    let account2 = pool.get_account_by_uri(&uri("sip:account2@some.provider.example.com")).unwrap();
    assert!(account2.alias().is_none());
    assert_eq!(account2.user_id(), Some("test-userID"));
    assert_eq!(account2.credential(), Some(&Credential::ClearText("clear text passphrase".into())));
    assert_eq!(account2.outbound_proxy(), Some(&uri("sip:sip.linphone.org")));

    let account3 = pool.get_account_by_uri(&uri("sip:account3@some.provider.example.com")).unwrap();
    assert!(account3.alias().is_none());
    assert!(account3.credential().is_none());
    assert_eq!(account3.outbound_proxy(), Some(&uri("sip:127.0.0.1:5860;transport=tcp")));

    assert!(Arc::ptr_eq(
        &pool.get_account_by_alias(&uri("sip:alias@sip.example.org")).unwrap(),
        &account1
    ));

    // same rows again: nothing added or removed
    let again = pool.load(&loader).await.unwrap();
    assert_eq!((again.added, again.kept, again.removed), (0, 3, 0));
}

#[tokio::test]
async fn sql_pool_from_providers_document() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("accounts.db");
    create_database(&db).await;

    let json = serde_json::json!({
        "schemaVersion": 2,
        "providers": [{
            "name": "Provider",
            "triggerCondition": { "strategy": "Always" },
            "accountToUse": { "strategy": "Random" },
            "onAccountNotFound": "decline",
            "outgoingInvite": { "to": "{incoming.to}" },
            "accountPool": "FromDb"
        }],
        "accountPools": {
            "FromDb": {
                "outboundProxy": "<sip:127.0.0.1:5860;transport=tcp>",
                "registrationRequired": false,
                "maxCallsPerLine": 1,
                "loader": {
                    "dbBackend": "sqlite3",
                    "initQuery": INIT_QUERY,
                    "updateQuery": "not yet implemented",
                    "connection": db.display().to_string()
                }
            }
        }
    });
    let document = ProvidersDocument::from_json(&json.to_string()).unwrap();
    let bridge = BridgeApplication::from_document(&document, None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(bridge.pool("FromDb").unwrap().len(), 3);
}

#[tokio::test]
async fn unsupported_backend_and_missing_database() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = loader_config(&dir.path().join("absent.db"));

    let loader = SqlLoader::new(config.clone()).unwrap();
    assert!(matches!(loader.initial_load().await, Err(Error::Sql(_))));

    config.db_backend = "mysql".into();
    assert!(matches!(SqlLoader::new(config), Err(Error::Configuration(_))));
}
