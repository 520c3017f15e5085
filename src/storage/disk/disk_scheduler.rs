use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

use super::DiskManager;

/// A single disk I/O request handed to the worker thread. Callers go
/// through the `_sync` wrappers; requests never leave this module.
struct DiskRequest {
    is_write: bool,
    page_id: PageId,
    /// For reads the worker writes here; for writes it reads from here.
    data: *mut u8,
    completion: Sender<bool>,
}

// The data pointer is only dereferenced by the worker while the issuing
// thread blocks on the completion channel, so the buffer outlives the use.
unsafe impl Send for DiskRequest {}

/// DiskScheduler runs a background worker thread that serializes page I/O
/// against the disk manager. Callers use the `_sync` methods, which block
/// until their request completes.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (request_tx, request_rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || Self::run_worker(dm, request_rx, stop));

        Self {
            disk_manager,
            request_tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Reads a page, blocking until the worker completes it.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        self.round_trip(DiskRequestKind::Read, page_id, data.as_mut_ptr())
    }

    /// Writes a page, blocking until the worker completes it.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        // The worker only reads through this pointer for write requests.
        self.round_trip(DiskRequestKind::Write, page_id, data.as_ptr() as *mut u8)
    }

    fn round_trip(&self, kind: DiskRequestKind, page_id: PageId, data: *mut u8) -> Result<()> {
        let (tx, rx) = bounded(1);
        let request = DiskRequest {
            is_write: matches!(kind, DiskRequestKind::Write),
            page_id,
            data,
            completion: tx,
        };
        self.request_tx
            .send(request)
            .map_err(|e| StrataError::Channel(format!("failed to schedule request: {e}")))?;

        let ok = rx
            .recv()
            .map_err(|e| StrataError::Channel(format!("failed to receive completion: {e}")))?;
        if !ok {
            return Err(StrataError::Channel(format!(
                "disk request for {page_id} failed"
            )));
        }
        Ok(())
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        request_rx: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = request_rx.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match request_rx.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        let ok = if request.is_write {
            // Safety: the issuer keeps the buffer alive until completion.
            let data = unsafe { std::slice::from_raw_parts(request.data, PAGE_SIZE) };
            disk_manager.write_page(request.page_id, data).is_ok()
        } else {
            // Safety: as above, and reads have exclusive access to the buffer.
            let data = unsafe { std::slice::from_raw_parts_mut(request.data, PAGE_SIZE) };
            disk_manager.read_page(request.page_id, data).is_ok()
        };
        let _ = request.completion.send(ok);
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

enum DiskRequestKind {
    Read,
    Write,
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sync_round_trip() {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let mut out = [0u8; PAGE_SIZE];
        out[0] = 42;
        out[100] = 255;
        scheduler
            .schedule_write_sync(PageId::new(1), &out)
            .unwrap();

        let mut back = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(PageId::new(1), &mut back)
            .unwrap();
        assert_eq!(back[0], 42);
        assert_eq!(back[100], 255);
    }

    #[test]
    fn test_interleaved_requests() {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        for i in 0..8u8 {
            let data = [i; PAGE_SIZE];
            scheduler
                .schedule_write_sync(PageId::new(i as u32), &data)
                .unwrap();
        }
        for i in 0..8u8 {
            let mut data = [0u8; PAGE_SIZE];
            scheduler
                .schedule_read_sync(PageId::new(i as u32), &mut data)
                .unwrap();
            assert_eq!(data[0], i);
        }
    }
}
