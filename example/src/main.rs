use backend_pool::{Manager, Pool, PoolConfig, Target};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stand-in for a network backend: every connect costs a round trip
#[derive(Debug)]
pub struct SimulatedBackend {
    target: Target,
}

#[derive(Debug)]
pub struct Session {
    dsn: String,
    statements: u64,
}

impl Manager for SimulatedBackend {
    type Connection = Session;
    type Context = Vec<String>;
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tokio::time::sleep(Duration::from_millis(15)).await;
        Ok(Session {
            dsn: self.target.connection_string(),
            statements: 0,
        })
    }

    async fn prepare(&self, conn: &mut Self::Connection) -> Result<Self::Context, Self::Error> {
        conn.statements += 1;
        Ok(vec!["SET session_replication_role = origin".to_string()])
    }

    async fn check(&self, conn: &mut Self::Connection, _ctx: &mut Self::Context) -> Result<(), Self::Error> {
        if conn.statements > 20 {
            return Err(format!("session on {} is stale", self.target.host));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,backend_pool=debug")),
        )
        .init();

    let config = PoolConfig::new(2, 6)
        .with_cleanup_interval(Duration::from_millis(200))
        .with_acquire_timeout(Some(Duration::from_secs(1)));
    let backend = SimulatedBackend {
        target: Target::default(),
    };
    let p = Pool::new(backend, config).await.unwrap();
    p.start_cleanup();
    println!("status = {}", p.state());

    let mut tasks = vec![];
    for i in 0..10 {
        let p = p.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = p.get().await.unwrap();
            let (session, ctx) = conn.split_mut();
            session.statements += 1;
            ctx.push(format!("SELECT {}", i));
            tokio::time::sleep(Duration::from_millis(30)).await;
            if i == 7 {
                conn.evict();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    println!("status = {}", p.state());

    let conn = p.get().await.unwrap();
    println!("conn = {} ({})", conn.id(), conn.dsn);
    drop(conn);

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("status = {}", p.state());
    p.close();
}
