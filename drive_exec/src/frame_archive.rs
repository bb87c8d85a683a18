//! # Frame Archive
//!
//! Saves the raw camera frames of a run to disk. Writes are done in a background thread so that a
//! slow disk never stalls the control loop.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use comms_if::eqpt::cam::CamFrame;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Format of archived frame names, millisecond resolution.
const FRAME_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct FrameArchive {
    folder: PathBuf,

    sender: Option<Sender<(PathBuf, CamFrame)>>,

    save_jh: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Cannot clear the existing archive folder {0:?}: {1}")]
    CannotClearFolder(PathBuf, std::io::Error),

    #[error("Cannot create the archive folder {0:?}: {1}")]
    CannotCreateFolder(PathBuf, std::io::Error),

    #[error("Cannot start the archive thread: {0}")]
    CannotSpawnThread(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FrameArchive {
    /// Create a new archive in the given folder.
    ///
    /// Any existing folder at the path is deleted along with its contents, so each run starts
    /// with an empty archive.
    pub fn new<P: AsRef<Path>>(folder: P) -> Result<Self, ArchiveError> {
        let folder = folder.as_ref().to_path_buf();

        if folder.exists() {
            fs::remove_dir_all(&folder)
                .map_err(|e| ArchiveError::CannotClearFolder(folder.clone(), e))?;
        }
        fs::create_dir_all(&folder)
            .map_err(|e| ArchiveError::CannotCreateFolder(folder.clone(), e))?;

        let (tx, rx) = channel();

        let save_jh = thread::Builder::new()
            .name("frame_archive".into())
            .spawn(move || save_thread(rx))
            .map_err(ArchiveError::CannotSpawnThread)?;

        Ok(Self {
            folder,
            sender: Some(tx),
            save_jh: Some(save_jh),
        })
    }

    /// The folder frames are being written into.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Queue the frame to be saved with the current time as its name.
    pub fn save(&self, frame: CamFrame) {
        let path = self.folder.join(frame_file_name(&Utc::now()));

        if let Some(ref sender) = self.sender {
            if let Err(e) = sender.send((path, frame)) {
                warn!("Could not send frame to the archive thread: {}", e);
            }
        }
    }
}

impl Drop for FrameArchive {
    /// Waits for all queued frames to be written.
    fn drop(&mut self) {
        // Closing the channel ends the save thread once it has drained
        self.sender.take();

        if let Some(jh) = self.save_jh.take() {
            if jh.join().is_err() {
                warn!("Frame archive thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn frame_file_name(time: &DateTime<Utc>) -> String {
    format!("{}.jpg", time.format(FRAME_TIMESTAMP_FORMAT))
}

fn save_thread(receiver: Receiver<(PathBuf, CamFrame)>) {
    for (path, frame) in receiver.iter() {
        let mut file = match OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) => {
                warn!("Couldn't create frame file {:?}: {}", path, e);
                continue;
            }
        };

        match file.write_all(&frame.data) {
            Ok(_) => debug!("Archived frame to {:?}", path),
            Err(e) => warn!("Couldn't write frame file {:?}: {}", path, e)
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_frame_file_name() {
        let t = Utc.with_ymd_and_hms(2017, 5, 3, 14, 7, 9).unwrap() + Duration::milliseconds(42);
        assert_eq!(frame_file_name(&t), "2017_05_03_14_07_09_042.jpg");
    }

    #[test]
    fn test_archive_recreates_folder_and_saves() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("run");

        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("stale.jpg"), b"old").unwrap();

        let archive = FrameArchive::new(&folder).unwrap();
        assert!(!folder.join("stale.jpg").exists());

        archive.save(CamFrame { data: vec![1, 2, 3] });

        // Dropping flushes the queue
        drop(archive);

        let entries: Vec<_> = fs::read_dir(&folder)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extension().unwrap(), "jpg");
        assert_eq!(fs::read(&entries[0]).unwrap(), vec![1, 2, 3]);
    }
}
