//! Orchestration of a whole extraction task.
//!
//! [extract_data] is the main entry point for the library: it wires
//! the configured writer, resolves the vertical file list, spawns the
//! worker thread and hands back a status channel. The worker runs
//! every file through an [Extractor], optionally triggers the ARF
//! pass, applies the retention window and commits - all inside one
//! database transaction which is rolled back on any fatal error.

use crate::config::{import_structattr_name, Config};
use crate::db;
use crate::errors::{ExtractError, Result};
use crate::extractor::{Extractor, Status};
use crate::vertical::VerticalParser;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use itertools::Itertools;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cooperative cancellation flag, checked at every parser event and
/// at every 1000-row boundary while flushing colcounts.
pub type CancelToken = Arc<AtomicBool>;

/// A running extraction: read progress from `status` until the
/// channel closes, then [Extraction::wait] for the final outcome.
pub struct Extraction {
    pub status: Receiver<Status>,
    handle: JoinHandle<Result<()>>,
}

impl Extraction {
    pub fn wait(self) -> Result<()> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(ExtractError::Internal("extraction worker panicked".to_owned())))
    }
}

fn send_err_status(tx: &Sender<Status>, file: &str, err: &ExtractError) {
    let _ = tx.send(Status {
        time: Utc::now(),
        file: file.to_owned(),
        processed_atoms: 0,
        processed_lines: 0,
        error: Some(err.to_string()),
    });
}

/// Picks a progress-log interval from the file size so that a file
/// produces roughly ten reports, with a correction for compressed
/// input. Powers of ten, floor 100.
fn determine_line_reporting_step(path: &Path) -> usize {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut estimate = size as f64 * 0.02;
    let name = path.to_string_lossy();
    if name.ends_with(".gz") || name.ends_with(".tgz") {
        estimate *= 20.0;
    }
    let mut step = 100usize;
    while step < 1_000_000_000 && estimate / step as f64 >= 10.0 {
        step *= 10;
    }
    step
}

fn resolve_files(conf: &Config) -> Result<Vec<PathBuf>> {
    if !conf.vertical_file.is_empty() {
        let path = PathBuf::from(&conf.vertical_file);
        if path.is_file() {
            return Ok(vec![path]);
        }
        if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(&path)?
                .filter_map_ok(|entry| {
                    let p = entry.path();
                    p.is_file().then_some(p)
                })
                .collect::<std::result::Result<_, _>>()?;
            files.sort();
            if files.is_empty() {
                return Err(ExtractError::ConfigInvalid(format!(
                    "no vertical files found in directory {}",
                    path.display()
                )));
            }
            return Ok(files);
        }
        return Err(ExtractError::ConfigInvalid(format!(
            "verticalFile {} is neither a file nor a directory",
            path.display()
        )));
    }
    let files: Vec<PathBuf> = conf.vertical_files.iter().map(PathBuf::from).collect();
    match files.iter().find(|f| !f.is_file()) {
        Some(missing) => Err(ExtractError::ConfigInvalid(format!(
            "vertical file {} does not exist",
            missing.display()
        ))),
        None => Ok(files),
    }
}

/// Extracts structural and positional attributes from the configured
/// vertical file(s). Returns immediately; progress and recoverable
/// errors arrive on the status channel, the final outcome through
/// [Extraction::wait].
pub fn extract_data(conf: &Config, append: bool, cancel: CancelToken) -> Result<Extraction> {
    conf.validate()?;
    let mut writer = db::new_writer(conf)?;
    let db_existed = writer.exists();
    if !db_existed && append {
        writer.close();
        return Err(ExtractError::ConfigInvalid(format!(
            "append mode is set but the database {} does not exist",
            conf.db.name
        )));
    }
    let files = resolve_files(conf)?;
    let (tx, rx) = bounded(10);
    let conf = conf.clone();
    let handle = thread::spawn(move || {
        let res = run_extraction(writer.as_mut(), &conf, append, &files, cancel, &tx);
        if res.is_err() {
            if let Err(e) = writer.rollback() {
                warn!("rollback failed: {e}");
            }
        }
        writer.close();
        res
    });
    Ok(Extraction { status: rx, handle })
}

fn run_extraction(
    writer: &mut dyn db::Writer,
    conf: &Config,
    append: bool,
    files: &[PathBuf],
    cancel: CancelToken,
    tx: &Sender<Status>,
) -> Result<()> {
    if let Err(e) = writer.initialize(append).map_err(ExtractError::from) {
        send_err_status(tx, "", &e);
        return Err(e);
    }
    for file in files {
        info!("processing vertical {}", file.display());
        let parser = VerticalParser::new(determine_line_reporting_step(file));
        let (sub_tx, sub_rx) = bounded::<Status>(10);
        let forwarder = {
            let tx = tx.clone();
            let file_name = file.to_string_lossy().into_owned();
            thread::spawn(move || {
                for mut status in sub_rx {
                    status.file.clone_from(&file_name);
                    let _ = tx.send(status);
                }
            })
        };
        let result = Extractor::new(&mut *writer, conf, cancel.clone(), sub_tx)
            .and_then(|mut extractor| extractor.run(&parser, file));
        // the extractor (and with it the sub-channel sender) is gone,
        // so the forwarder drains and exits
        let _ = forwarder.join();
        if let Err(e) = result {
            send_err_status(tx, &file.to_string_lossy(), &e);
            return Err(e);
        }
    }
    if !conf.remove_entries_before_date.is_empty() {
        let attr = import_structattr_name(&conf.date_attr);
        match writer.remove_records_older_than(&conf.remove_entries_before_date, &attr) {
            Ok(removed) => info!(
                "removed {removed} records with {attr} older than {}",
                conf.remove_entries_before_date
            ),
            Err(e) => {
                let e = ExtractError::from(e);
                send_err_status(tx, "", &e);
                return Err(e);
            }
        }
    }
    if let Err(e) = writer.commit().map_err(ExtractError::from) {
        send_err_status(tx, "", &e);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reporting_step_has_floor() {
        // nonexistent file reads as zero size
        let step = determine_line_reporting_step(Path::new("/nonexistent.vrt"));
        assert_eq!(step, 100);
    }

    #[test]
    fn missing_vertical_file_rejected() {
        let mut conf = crate::config::template("c1");
        conf.vertical_file = "/nonexistent/corpus.vrt".to_owned();
        assert!(resolve_files(&conf).is_err());
    }

    #[test]
    fn explicit_file_list_must_exist() {
        let mut conf = crate::config::template("c1");
        conf.vertical_files = vec!["/nonexistent/a.vrt".to_owned()];
        assert!(resolve_files(&conf).is_err());
    }
}
