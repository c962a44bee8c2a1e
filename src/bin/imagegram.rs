//! imagegram CLI: run the workers, submit posts and comments, inspect dead letters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use imagegram::config::Config;
use imagegram::config::secrets::ExposeSecret;
use imagegram::db::{Db, PgTableStore};
use imagegram::ingest::{CreateCommentRequest, CreatePostRequest, Ingest, IngestResponse};
use imagegram::model::ImageFile;
use imagegram::processor::{CreateCommentEffect, CreatePostEffect, DomainEffect, MessageProcessor};
use imagegram::queue::{CREATE_COMMENT_QUEUE, CREATE_POST_QUEUE, PgmqQueue};
use imagegram::retry::RetryCoordinator;
use imagegram::storage::FsBlobStore;
use imagegram::telemetry::{TelemetryConfig, init_telemetry};
use imagegram::worker::{Worker, WorkerConfig};
use tokio::task::JoinSet;
use tracing::info;

#[derive(Parser)]
#[command(name = "imagegram", about = "Queue-backed ingestion for posts and comments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the create-post and create-comment workers
    Serve {
        /// TOML file overriding the retry, storage and worker settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Workers per queue (defaults to WORKERS_PER_QUEUE)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Submit a post with an image
    Post {
        /// Image file to upload
        file: PathBuf,
        /// Caption for the post
        #[arg(long, default_value = "")]
        caption: String,
        /// Content type (guessed from the extension when absent)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Submit a comment on a post
    Comment {
        /// Id of the post being commented on
        post_id: String,
        /// Comment text
        text: String,
    },
    /// Show how many messages sit in a queue's dead-letter queue
    DeadLetters {
        /// Source queue name (e.g. process_create_post)
        queue: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, workers } => cmd_serve(config, workers).await,
        Command::Post {
            file,
            caption,
            content_type,
        } => cmd_post(connect().await?, &file, caption, content_type).await,
        Command::Comment { post_id, text } => cmd_comment(connect().await?, post_id, text).await,
        Command::DeadLetters { queue } => cmd_dead_letters(connect().await?, queue).await,
    }
}

async fn connect() -> anyhow::Result<Arc<Db>> {
    let config = Config::from_env()?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn cmd_serve(config_file: Option<PathBuf>, workers: Option<usize>) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(ref path) = config_file {
        config.apply_file(path)?;
    }
    let per_queue = workers.unwrap_or(config.worker.workers_per_queue).max(1);

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "imagegram".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let posts = Arc::new(PgmqQueue::new(Arc::clone(&db), CREATE_POST_QUEUE));
    let comments = Arc::new(PgmqQueue::new(Arc::clone(&db), CREATE_COMMENT_QUEUE));
    posts.ensure_queues().await?;
    comments.ensure_queues().await?;

    let blobs = Arc::new(FsBlobStore::new(config.storage.blob_root.clone()));
    let table = Arc::new(PgTableStore::new(Arc::clone(&db)));
    let coordinator = RetryCoordinator::new(config.retry);
    let effect_timeout = config.worker.effect_timeout;

    let post_worker = Worker::new(
        MessageProcessor::new(
            CreatePostEffect::new(
                Arc::clone(&blobs),
                Arc::clone(&table),
                config.storage.posted_images_container.clone(),
            ),
            posts,
            coordinator,
            effect_timeout,
        ),
        WorkerConfig::from(&config.worker),
    );
    let comment_worker = Worker::new(
        MessageProcessor::new(
            CreateCommentEffect::new(Arc::clone(&table)),
            comments,
            coordinator,
            effect_timeout,
        ),
        WorkerConfig::from(&config.worker),
    );

    info!(
        per_queue,
        next_attempt_delay = ?config.retry.next_attempt_delay,
        overall_timeout = ?config.retry.overall_timeout,
        effect_timeout = ?config.worker.effect_timeout,
        visibility_timeout = ?config.worker.visibility_timeout,
        "starting workers"
    );

    let mut tasks = JoinSet::new();
    spawn_workers(&mut tasks, &post_worker, per_queue);
    spawn_workers(&mut tasks, &comment_worker, per_queue);

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
    post_worker.shutdown();
    comment_worker.shutdown();

    while let Some(joined) = tasks.join_next().await {
        joined?;
    }
    Ok(())
}

fn spawn_workers<E, Q>(tasks: &mut JoinSet<()>, worker: &Worker<E, Q>, count: usize)
where
    E: DomainEffect + 'static,
    Q: imagegram::queue::QueueTransport + 'static,
{
    for _ in 0..count {
        let worker = worker.clone();
        tasks.spawn(async move { worker.run().await });
    }
}

fn ingest(db: &Arc<Db>) -> Ingest<PgmqQueue, PgmqQueue> {
    Ingest::new(
        PgmqQueue::new(Arc::clone(db), CREATE_POST_QUEUE),
        PgmqQueue::new(Arc::clone(db), CREATE_COMMENT_QUEUE),
    )
}

async fn cmd_post(
    db: Arc<Db>,
    file: &Path,
    caption: String,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    PgmqQueue::new(Arc::clone(&db), CREATE_POST_QUEUE)
        .ensure_queues()
        .await?;

    let content = tokio::fs::read(file).await?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = content_type.unwrap_or_else(|| guess_content_type(&file_name).to_string());

    let response = ingest(&db)
        .submit_post(CreatePostRequest {
            image_caption: caption,
            image_file: Some(ImageFile {
                file_name,
                content_type,
                content,
            }),
        })
        .await;
    report(response)
}

async fn cmd_comment(db: Arc<Db>, post_id: String, text: String) -> anyhow::Result<()> {
    PgmqQueue::new(Arc::clone(&db), CREATE_COMMENT_QUEUE)
        .ensure_queues()
        .await?;

    let response = ingest(&db)
        .submit_comment(CreateCommentRequest {
            post_id,
            comments: text,
        })
        .await;
    report(response)
}

async fn cmd_dead_letters(db: Arc<Db>, queue: String) -> anyhow::Result<()> {
    let queue = PgmqQueue::new(db, queue);
    let count = queue.dead_letter_count().await?;
    println!("{}: {count} dead-lettered message(s)", queue.dead_letter_name());
    Ok(())
}

fn report(response: IngestResponse) -> anyhow::Result<()> {
    println!("{response}");
    match response {
        IngestResponse::Created { .. } => Ok(()),
        IngestResponse::BadRequest(msg) => anyhow::bail!("request rejected: {msg}"),
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
