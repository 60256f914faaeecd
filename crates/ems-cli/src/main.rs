use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ems_core::config::Config;
use ems_core::domain::{Event, EventId, RsvpStatus, User, UserId};
use ems_core::impls::{HttpMailTransport, InMemoryStore, LogMailTransport};
use ems_core::ports::{Clock, EventRepository, MailTransport, SystemClock, UserRepository};
use ems_core::queue::{Broker, InMemoryBroker, QueueClient};
use ems_core::service::{MailService, NotificationScheduler, server_builder};
use ems_core::worker::WorkerPool;

/// How long buffered pool work may take to drain on shutdown.
const POOL_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

async fn seed(store: &InMemoryStore) -> (Event, Vec<UserId>) {
    let names = ["ada", "grace", "linus"];
    for (i, name) in names.iter().enumerate() {
        store
            .insert_user(User {
                id: UserId::new(i as i64 + 1),
                name: name.to_string(),
                email: format!("{name}@example.com"),
            })
            .await;
    }

    let event = Event {
        id: EventId::new(1),
        title: "Release party".into(),
        description: Some("Demo event".into()),
        location: Some("Main hall".into()),
        start_time: Utc::now() + chrono::Duration::minutes(11),
        end_time: None,
        created_by: Some(UserId::new(1)),
    };
    store.insert_event(event.clone()).await;
    store
        .set_rsvp(event.id, UserId::new(1), RsvpStatus::Accepted)
        .await;
    store
        .set_rsvp(event.id, UserId::new(2), RsvpStatus::Accepted)
        .await;
    store
        .set_rsvp(event.id, UserId::new(3), RsvpStatus::Pending)
        .await;

    // the organizer is not invited through the broker
    (event, vec![UserId::new(2), UserId::new(3)])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ems_core=info,ems_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting event notification worker");

    let mail: Arc<dyn MailTransport> = match &config.email.url {
        Some(url) => Arc::new(HttpMailTransport::new(url.clone(), config.email_timeout())?),
        None => {
            tracing::warn!("EMAIL_URL not set; emails will only be logged");
            Arc::new(LogMailTransport)
        }
    };

    let store = Arc::new(InMemoryStore::new());
    let (event, invited) = seed(&store).await;

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let scheduler = Arc::new(NotificationScheduler::new(
        QueueClient::new(Arc::clone(&broker), config.queue_defaults()),
        Arc::clone(&store) as Arc<dyn UserRepository>,
        Arc::clone(&store) as Arc<dyn EventRepository>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        config.notification_settings(),
    ));

    let pool = Arc::new(
        WorkerPool::new(config.app.number_of_workers, config.app.worker_queue_capacity)?
            .with_backoff_unit(config.worker_backoff()),
    );
    pool.start();
    let mail_service = MailService::new(
        Arc::clone(&mail),
        Arc::clone(&store) as Arc<dyn UserRepository>,
        Arc::clone(&pool),
        config.app.public_url.clone(),
    );

    let server = server_builder(Arc::clone(&broker), Arc::clone(&scheduler), mail)?
        .concurrency(config.broker.concurrency)
        .build()?
        .start();

    let scheduled = scheduler.on_event_created(&event, &invited).await;
    tracing::info!(?scheduled, event_id = %event.id, "event notifications scheduled");

    // Organizer copy goes out directly, without the broker.
    let sent = mail_service
        .send_invitation_emails(&[UserId::new(1)], &event)
        .await?;
    tracing::info!(sent, "organizer invitation submitted");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    server.shutdown_and_join().await;
    if let Err(e) = pool.stop_with_deadline(POOL_DRAIN_DEADLINE).await {
        tracing::warn!(error = %e, "worker pool did not drain in time");
    }

    let counts = broker.counts_by_state(&config.broker.queue).await?;
    tracing::info!(?counts, "final queue state");
    Ok(())
}
