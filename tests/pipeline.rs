//! End-to-end runs over real loopback sockets

use bytes::Bytes;
use camrelay::{
    BufferHandle, CaptureDevice, CapturedBuffer, Dequeue, DeviceInfo, FrameReceiver, FrameStore,
    Pipeline, PixelFormat, RelayError, ReplayDevice, Result, TransmitSettings, UdpSink,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn settings(interval_ms: u64, max_datagram_size: usize) -> TransmitSettings {
    TransmitSettings { interval: Duration::from_millis(interval_ms), max_datagram_size }
}

async fn start_receiver() -> (SocketAddr, Arc<FrameStore>, CancellationToken) {
    let receiver = FrameReceiver::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = receiver.local_addr().unwrap();
    let store = Arc::new(FrameStore::new());
    let cancel = CancellationToken::new();
    tokio::spawn(receiver.run(Arc::clone(&store), cancel.clone()));
    (addr, store, cancel)
}

async fn wait_for_frame(store: &FrameStore) -> Bytes {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(frame) = store.snapshot() {
                return frame.data;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("a frame reaches the receiver")
}

#[tokio::test]
async fn replayed_frames_reach_the_receiver() {
    let (addr, received, stop_receiver) = start_receiver().await;

    let frames = vec![b"frame-0".to_vec(), b"frame-1".to_vec(), b"frame-2".to_vec()];
    let device = ReplayDevice::from_frames("memory", frames.clone(), 200.0, true).unwrap();
    let sink = UdpSink::bind(addr).await.unwrap();
    let pipeline = Pipeline::new(device, sink, settings(2, 65_507));
    let cancel = pipeline.cancel_token();
    let running = tokio::spawn(pipeline.run());

    let data = wait_for_frame(&received).await;
    assert!(frames.iter().any(|f| f.as_slice() == data.as_ref()), "unexpected payload {data:?}");

    cancel.cancel();
    let report = running.await.unwrap().expect("clean shutdown");
    assert!(!report.exhausted);
    assert!(report.stats.frames_sent >= 1);
    assert_eq!(report.stats.send_failures, 0);

    stop_receiver.cancel();
}

#[tokio::test]
async fn oversized_frames_are_never_sent() {
    let (addr, received, stop_receiver) = start_receiver().await;

    let device = ReplayDevice::from_frames("memory", vec![vec![7u8; 2048]], 100.0, true).unwrap();
    let sink = UdpSink::bind(addr).await.unwrap();
    let pipeline = Pipeline::new(device, sink, settings(2, 1024));
    let cancel = pipeline.cancel_token();
    let running = tokio::spawn(pipeline.run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    let report = running.await.unwrap().expect("clean shutdown");

    assert_eq!(report.stats.frames_sent, 0);
    assert!(report.stats.oversized_frames >= 1);
    assert!(received.is_empty());

    stop_receiver.cancel();
}

#[tokio::test]
async fn exhausted_replay_shuts_down_on_its_own() {
    let (addr, _received, stop_receiver) = start_receiver().await;

    let device = ReplayDevice::from_frames("memory", vec![b"once".to_vec()], 50.0, false).unwrap();
    let sink = UdpSink::bind(addr).await.unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        Pipeline::new(device, sink, settings(5, 65_507)).run(),
    )
    .await
    .expect("pipeline stops without a cancel")
    .expect("clean shutdown");

    assert!(report.exhausted);
    assert_eq!(report.stats.frames_captured, 1);

    stop_receiver.cancel();
}

/// Device that hands out a single frame, then fails
struct BrokenCamera {
    frame: Vec<u8>,
    served: bool,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl CaptureDevice for BrokenCamera {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from("/dev/broken"),
            driver: String::from("broken"),
            width: 320,
            height: 240,
            pixel_format: PixelFormat::Mjpeg,
            buffer_count: 1,
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Dequeue<'_>> {
        if self.served {
            std::thread::sleep(Duration::from_millis(20));
            return Err(RelayError::dequeue_failed(std::io::Error::other("device unplugged")));
        }
        self.served = true;
        Ok(Dequeue::Ready(CapturedBuffer { handle: BufferHandle(0), bytes: &self.frame }))
    }

    fn requeue(&mut self, _handle: BufferHandle) -> Result<()> {
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn device_fault_is_reported_after_teardown() {
    let (addr, _received, stop_receiver) = start_receiver().await;

    let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let device =
        BrokenCamera { frame: b"last".to_vec(), served: false, closed: Arc::clone(&closed) };
    let sink = UdpSink::bind(addr).await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        Pipeline::new(device, sink, settings(5, 65_507)).run(),
    )
    .await
    .expect("fault stops the pipeline");

    let err = result.expect_err("device fault is fatal");
    assert!(err.is_fatal());
    assert!(matches!(err, RelayError::Dequeue { .. }));
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));

    stop_receiver.cancel();
}
