use std::sync::Arc;
use std::time::SystemTime;

use ambit::*;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

// Define regular traits and implementor structs

trait Logger: Send + Sync {
    fn log(&self, content: &str);
}

#[derive(Default)]
struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, content: &str) {
        println!("{}", content);
    }
}

/// Decorates the logger of the enclosing scope
struct PrefixLogger {
    prefix: String,
    inner: Arc<dyn Logger>,
}

impl Logger for PrefixLogger {
    fn log(&self, content: &str) {
        self.inner.log(&format!("[{}] {}", self.prefix, content));
    }
}

struct Database {
    url: String,
}

#[derive(Clone, Debug)]
struct User(String);

// Declare the injected contexts

static LOGGER: Lazy<Context<Arc<dyn Logger>>> = Lazy::new(|| Context::named("logger"));
static DATABASE: Lazy<Context<Arc<Database>>> = Lazy::new(|| Context::named("database"));
static USER: Lazy<OptionalContext<User>> = Lazy::new(|| Context::optional_named("user"));

fn prefixed(prefix: &'static str) -> impl Fn() -> Arc<dyn Logger> + Send + Sync {
    move || {
        // resolves the logger of the enclosing scope, not this one
        let inner = LOGGER
            .resolve()
            .unwrap_or_else(|_| Arc::new(StdoutLogger) as Arc<dyn Logger>);
        let logger: Arc<dyn Logger> = Arc::new(PrefixLogger {
            prefix: prefix.to_string(),
            inner,
        });
        logger
    }
}

async fn load_profile(id: u32) -> Result<(), ContextError> {
    let logger = LOGGER.resolve()?;
    let db = DATABASE.resolve()?;
    let user = USER.resolve().map_or("anonymous".to_string(), |u| u.0);
    tokio::task::yield_now().await;
    logger.log(&format!("profile {} loaded from {} for {}", id, db.url, user));
    Ok(())
}

async fn handle_request(id: u32) -> Result<(), ContextError> {
    let request = contexts![
        LOGGER.provide(prefixed("request")),
        USER.provide(move || User(format!("user-{}", id))),
    ];
    request
        .scope(async move {
            LOGGER.resolve()?.log("start");
            // both tasks see the request scope
            let first = spawn(load_profile(id));
            let second = spawn(load_profile(id + 100));
            first.await.expect("profile task")?;
            second.await.expect("profile task")?;
            LOGGER.resolve()?.log("done");
            Ok::<_, ContextError>(())
        })
        .await
}

#[tokio::main]
async fn main() -> Result<(), ContextError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = contexts![
        LOGGER.provide(|| Arc::new(StdoutLogger) as Arc<dyn Logger>),
        DATABASE.provide(|| {
            Arc::new(Database {
                url: "postgres://localhost/app".to_string(),
            })
        }),
    ];

    app.scope(async {
        let started = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        LOGGER.resolve()?.log(&format!("{}s since epoch", started));

        handle_request(1).await?;
        handle_request(2).await?;

        // the request scope is gone, only the application logger remains
        load_profile(0).await
    })
    .await
}
