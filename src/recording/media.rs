//! Auxiliary artifacts: JPEG stills and WAV segments.
//!
//! Saves run on the blocking pool (or a plain thread when no runtime is
//! around) and never touch the session log. Each one reports back by
//! enqueueing an action on the dispatcher, which the serialization loop runs
//! against its [`MediaEvents`] context.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Local};
use tokio::runtime::Handle;

use crate::dispatch::DispatchHandle;
use crate::error::{SuiteError, SuiteResult};
use crate::sensors::{AudioClip, Camera, SensorCategory, StillFormat};
use crate::{log_debug, log_error, log_warn};

use super::wav::write_wav;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    VideoFrame,
    AudioFile,
}

impl MediaKind {
    /// Event written to the session log once the file is on disk.
    pub fn saved_event(&self) -> &'static str {
        match self {
            MediaKind::VideoFrame => "VIDEO_FRAME_CAPTURED",
            MediaKind::AudioFile => "AUDIO_FILE_SAVED",
        }
    }
}

/// Receives save outcomes on the serialization thread.
pub trait MediaEvents {
    fn media_saved(&mut self, kind: MediaKind, file_name: String);

    fn media_failed(&mut self, kind: MediaKind, error: SuiteError);
}

/// Counts saves that have been spawned but have not yet reported back.
#[derive(Debug, Clone, Default)]
pub struct SaveTracker {
    in_flight: Arc<AtomicUsize>,
}

impl SaveTracker {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) -> SaveGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        SaveGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

struct SaveGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Clears the frame-in-flight flag when the capture worker ends, even if the
/// camera panics.
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Run `job` on the current runtime's blocking pool, or on its own thread
/// when called outside a runtime.
fn spawn_save<F>(job: F)
where
    F: FnOnce() + Send + 'static,
{
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(job);
        }
        Err(_) => {
            if let Err(err) = thread::Builder::new()
                .name("sensor-suite-save".into())
                .spawn(job)
            {
                log_error!("Failed to start background save: {err}");
            }
        }
    }
}

/// `frame_<yyyyMMdd_HH_mm_ss_ffff>.jpg`, ffff being ten-thousandths of a second.
pub fn frame_file_name(at: &DateTime<Local>) -> String {
    let ten_thousandths = (at.timestamp_subsec_nanos() / 100_000).min(9_999);
    format!(
        "frame_{}_{:04}.jpg",
        at.format("%Y%m%d_%H_%M_%S"),
        ten_thousandths
    )
}

/// `audio_<yyyyMMdd_HH_mm_ss>_<NNNN>.wav`.
pub fn audio_file_name(at: &DateTime<Local>, sequence: u32) -> String {
    format!("audio_{}_{:04}.wav", at.format("%Y%m%d_%H_%M_%S"), sequence)
}

/// `dir/name`, or `dir/stem_N.ext` for the first N that is free.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (file_name, String::new()),
    };
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Pre-capture, grab a still and save it as JPEG once exposure and white
/// balance have settled. `busy` is cleared when the worker finishes, whatever
/// the outcome.
pub fn capture_frame<C>(
    camera: Arc<dyn Camera>,
    frames_dir: PathBuf,
    busy: Arc<AtomicBool>,
    tracker: &SaveTracker,
    dispatch: DispatchHandle<C>,
) where
    C: MediaEvents + 'static,
{
    let guard = tracker.begin();
    let busy = BusyGuard { busy };
    spawn_save(move || {
        let outcome = capture_and_store(camera.as_ref(), &frames_dir);
        drop(busy);
        match outcome {
            Ok(Some(file_name)) => dispatch
                .enqueue(move |ctx: &mut C| ctx.media_saved(MediaKind::VideoFrame, file_name)),
            Ok(None) => {}
            Err(err) => {
                dispatch.enqueue(move |ctx: &mut C| ctx.media_failed(MediaKind::VideoFrame, err))
            }
        }
        drop(guard);
    });
}

fn capture_and_store(camera: &dyn Camera, frames_dir: &Path) -> SuiteResult<Option<String>> {
    camera
        .pre_capture()
        .map_err(|err| SuiteError::transient(SensorCategory::VideoFrame, err))?;
    let still = camera
        .capture_still()
        .map_err(|err| SuiteError::transient(SensorCategory::VideoFrame, err))?;

    if !still.is_converged() {
        log_debug!("discarding still: exposure/white balance not converged");
        return Ok(None);
    }
    if still.format != StillFormat::Jpeg {
        log_warn!("discarding still: unsupported format {:?}", still.format);
        return Ok(None);
    }

    fs::create_dir_all(frames_dir).map_err(|err| SuiteError::io(frames_dir, err))?;
    let path = unique_path(frames_dir, &frame_file_name(&Local::now()));
    let file_name = file_name_of(&path);
    fs::write(&path, &still.data).map_err(|err| SuiteError::BackgroundSave {
        file: file_name.clone(),
        message: err.to_string(),
    })?;
    Ok(Some(file_name))
}

/// Encode a finished segment to WAV at `path`.
pub fn save_audio<C>(
    clip: AudioClip,
    path: PathBuf,
    tracker: &SaveTracker,
    dispatch: DispatchHandle<C>,
) where
    C: MediaEvents + 'static,
{
    let guard = tracker.begin();
    spawn_save(move || {
        let file_name = file_name_of(&path);
        let result = path
            .parent()
            .map_or(Ok(()), |dir| {
                fs::create_dir_all(dir).map_err(|err| SuiteError::io(dir, err))
            })
            .and_then(|_| write_wav(&path, clip));
        match result {
            Ok(()) => dispatch
                .enqueue(move |ctx: &mut C| ctx.media_saved(MediaKind::AudioFile, file_name)),
            Err(err) => {
                let err = SuiteError::BackgroundSave {
                    file: file_name,
                    message: err.to_string(),
                };
                dispatch.enqueue(move |ctx: &mut C| ctx.media_failed(MediaKind::AudioFile, err))
            }
        }
        drop(guard);
    });
}
