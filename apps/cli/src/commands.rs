use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result, bail};
use indicatif::ProgressBar;
use relaydrive_crypto::EncryptionSettings;
use relaydrive_engine::{
    ConfirmCallback, JsonMetadataStore, MetadataStore, QueuedUpload, Session, TransferEvent,
    TransferSupervisor, UploadMeta,
};
use relaydrive_remote::{HttpRemoteStore, RemoteStore};
use relaydrive_transfer::{FileSink, FileSource, MemorySink, ShardSink, SinkOutput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{self, AppConfig};
use crate::progress;

/// Options shared by every command.
pub struct Context {
    pub password: Option<String>,
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
}

fn load_config(ctx: &Context) -> Result<AppConfig> {
    let mut cfg = AppConfig::load()?;
    if let Some(token) = &ctx.bot_token {
        cfg.bot_token = token.clone();
    }
    if let Some(channel) = &ctx.channel_id {
        cfg.channel_id = channel.clone();
    }
    Ok(cfg)
}

fn metadata_store() -> Result<Arc<dyn MetadataStore>> {
    let path = config::records_path()?;
    let store = JsonMetadataStore::open(path.clone())
        .with_context(|| format!("failed to open records at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Builds a session, unlocking it when encryption is enabled.
fn open_session(ctx: &Context, cfg: &AppConfig) -> Result<Session> {
    let store = HttpRemoteStore::new(cfg.store_config())
        .context("remote store is not configured (set bot_token and channel_id)")?;
    let session = Session::new(
        Arc::new(store) as Arc<dyn RemoteStore>,
        metadata_store()?,
        cfg.engine_config(),
    )?;

    if cfg.encryption.enabled {
        let key = cfg
            .encryption
            .unlock(ctx.password.as_deref())
            .context("failed to unlock encryption key (is RELAYDRIVE_PASSWORD set?)")?;
        session.unlock(key);
    }
    Ok(session)
}

/// Runs `op` on a supervisor while rendering its events. Ctrl-C cancels.
async fn supervised<T, F, Fut>(session: Session, op: F) -> Result<T>
where
    F: FnOnce(Arc<TransferSupervisor>, ProgressBar) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let mut supervisor = TransferSupervisor::new(session);
    let events: mpsc::Receiver<TransferEvent> = supervisor
        .take_events()
        .context("event stream already taken")?;
    let supervisor = Arc::new(supervisor);

    let done = CancellationToken::new();
    let pb = progress::bar();
    let renderer = tokio::spawn(progress::render(events, pb.clone(), done.clone()));

    let sup = Arc::clone(&supervisor);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling transfers");
            sup.cancel_all();
        }
    });

    let result = op(Arc::clone(&supervisor), pb).await;

    interrupt.abort();
    done.cancel();
    let _ = renderer.await;
    supervisor.shutdown();
    Ok(result)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub async fn upload(ctx: &Context, files: Vec<PathBuf>, parent: Option<String>) -> Result<()> {
    let cfg = load_config(ctx)?;
    let session = open_session(ctx, &cfg)?;

    let mut items = Vec::with_capacity(files.len());
    for path in &files {
        let source = FileSource::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        let mut meta = UploadMeta::new(name);
        if let Some(parent) = &parent {
            meta = meta.with_parent(parent.as_str());
        }
        items.push(QueuedUpload::new(Box::new(source), meta));
    }

    let outcomes = supervised(session, |sup, _| async move { sup.upload(items).await }).await??;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(record) => println!("{}\t{}", record.file_id, record.file_name),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e}", outcome.file_name);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} upload(s) failed", outcomes.len());
    }
    Ok(())
}

pub async fn download(
    ctx: &Context,
    file_id: String,
    output: Option<PathBuf>,
    in_memory: bool,
    assume_yes: bool,
) -> Result<()> {
    let cfg = load_config(ctx)?;
    let session = open_session(ctx, &cfg)?;
    let record = session
        .metadata()
        .get(&file_id)
        .await?
        .with_context(|| format!("no file with id {file_id}"))?;

    let dest = output.unwrap_or_else(|| PathBuf::from(&record.file_name));
    let shards = record.parts.len() as u32;
    let sink: Arc<dyn ShardSink> = if in_memory {
        Arc::new(MemorySink::new(shards))
    } else {
        Arc::new(FileSink::create(&dest, shards)?)
    };

    let output = supervised(session, |sup, pb| async move {
        let confirm = buffer_confirm(assume_yes, pb, ask_buffer);
        sup.download(&record, sink, Some(confirm)).await
    })
    .await??;

    let path = match output {
        SinkOutput::File(path) => path,
        SinkOutput::Memory(bytes) => {
            write_output(&dest, &bytes)?;
            dest
        }
    };
    info!(path = %path.display(), "download finished");
    println!("{}", path.display());
    Ok(())
}

pub async fn delete(ctx: &Context, file_id: String) -> Result<()> {
    let cfg = load_config(ctx)?;
    let session = open_session(ctx, &cfg)?;
    let report = relaydrive_engine::delete_file(&session, &file_id).await?;
    println!(
        "deleted {file_id}: {} shard(s) removed, {} failed",
        report.deleted, report.failed
    );
    Ok(())
}

pub async fn list(json: bool) -> Result<()> {
    let records = metadata_store()?.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for r in records {
        println!(
            "{}\t{}\t{} bytes\t{} part(s)\t{}\t{}",
            r.file_id,
            r.file_name,
            r.file_size,
            r.parts.len(),
            if r.encrypted { "encrypted" } else { "plain" },
            r.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn init_key(automatic: bool, force: bool) -> Result<()> {
    init_key_at(&config::config_path()?, automatic, force)?;
    if automatic {
        println!("Automatic key mode: the password is stored in the config file.");
    } else {
        println!("Manual key mode: supply the password via RELAYDRIVE_PASSWORD or --password.");
    }
    Ok(())
}

/// Writes fresh encryption settings into the config at `path`, keeping every
/// other field. An unreadable config is never overwritten.
fn init_key_at(path: &Path, automatic: bool, force: bool) -> Result<()> {
    let mut cfg = AppConfig::load_from(path)?;
    if cfg.encryption.enabled && !force {
        bail!(
            "encryption is already set up; replacing the salt makes existing files \
             unreadable (use --force)"
        );
    }
    cfg.encryption = if automatic {
        EncryptionSettings::automatic()
    } else {
        EncryptionSettings::manual()
    };
    cfg.save_to(path)?;
    info!(mode = ?cfg.encryption.mode, "encryption settings written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Size guard for in-memory downloads. `ask` blocks on the terminal, so it
/// runs with the bar hidden and outside the async scheduler.
fn buffer_confirm(assume_yes: bool, pb: ProgressBar, ask: fn(u64) -> bool) -> ConfirmCallback {
    Arc::new(move |size: u64| {
        assume_yes || pb.suspend(|| tokio::task::block_in_place(|| ask(size)))
    })
}

fn ask_buffer(size: u64) -> bool {
    prompt_buffer(&mut std::io::stdin().lock(), &mut std::io::stderr(), size)
}

fn prompt_buffer(input: &mut impl BufRead, output: &mut impl Write, size: u64) -> bool {
    let _ = write!(
        output,
        "File is {:.1} MiB and will be held in memory. Continue? [y/N] ",
        size as f64 / (1024.0 * 1024.0)
    );
    let _ = output.flush();
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn write_output(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes).with_context(|| format!("failed to write {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydrive_crypto::KeyMode;

    #[test]
    fn prompt_accepts_only_yes() {
        for (answer, expected) in [("y\n", true), ("yes\n", true), ("n\n", false), ("", false)] {
            let mut out = Vec::new();
            let ok = prompt_buffer(&mut answer.as_bytes(), &mut out, 600 * 1024 * 1024);
            assert_eq!(ok, expected, "answer {answer:?}");
            assert!(String::from_utf8(out).unwrap().contains("600.0 MiB"));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buffer_confirm_asks_off_the_async_worker() {
        let confirm = buffer_confirm(false, ProgressBar::hidden(), |size| size < 100);
        assert!(confirm(10));
        assert!(!confirm(1000));

        let always = buffer_confirm(true, ProgressBar::hidden(), |_| false);
        assert!(always(1000));
    }

    #[test]
    fn init_key_refuses_unparsable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let content =
            r#"{"bot_token":"123:abc","encryption":{"enabled":true,"salt":"AAAA"},}"#;
        std::fs::write(&path, content).unwrap();

        assert!(init_key_at(&path, false, false).is_err());
        assert!(init_key_at(&path, true, true).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn init_key_keeps_existing_salt_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let existing = AppConfig {
            bot_token: "123:abc".into(),
            encryption: EncryptionSettings::manual(),
            ..AppConfig::default()
        };
        existing.save_to(&path).unwrap();

        assert!(init_key_at(&path, true, false).is_err());
        assert!(AppConfig::load_from(&path).unwrap() == existing);
    }

    #[test]
    fn init_key_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        AppConfig {
            bot_token: "123:abc".into(),
            channel_id: "-1001".into(),
            ..AppConfig::default()
        }
        .save_to(&path)
        .unwrap();

        init_key_at(&path, true, false).unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.bot_token, "123:abc");
        assert_eq!(cfg.channel_id, "-1001");
        assert!(cfg.encryption.enabled);
        assert_eq!(cfg.encryption.mode, KeyMode::Automatic);
        assert!(cfg.encryption.salt_bytes().is_ok());
    }
}
