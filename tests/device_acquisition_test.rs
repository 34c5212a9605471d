#[cfg(test)]
mod device_acquisition_tests {
    use crabpreview::errors::{CameraError, Operation};
    use crabpreview::executor::BackgroundExecutor;
    use crabpreview::platform::HardwareError;
    use crabpreview::session::{DeviceAcquisition, DeviceHandle, DeviceRelease, DeviceState};
    use crabpreview::testing::{wait_until, HardwareCall, MockHardware, OpenBehavior};
    use crabpreview::types::CameraIdentity;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Fixture {
        hardware: MockHardware,
        executor: BackgroundExecutor,
        device: Arc<DeviceAcquisition>,
    }

    fn fixture(open_timeout: Duration) -> Fixture {
        let hardware = MockHardware::new();
        let executor = BackgroundExecutor::new("device-test");
        executor.start().unwrap();
        let device = Arc::new(DeviceAcquisition::new(
            Arc::new(hardware.clone()),
            executor.clone(),
            Duration::from_millis(200),
            open_timeout,
        ));
        Fixture {
            hardware,
            executor,
            device,
        }
    }

    fn back() -> CameraIdentity {
        CameraIdentity::new("0")
    }

    fn closes(hardware: &MockHardware) -> usize {
        hardware.call_count(|c| matches!(c, HardwareCall::CloseDevice(_)))
    }

    #[tokio::test]
    async fn test_open_then_close() {
        let f = fixture(Duration::from_secs(2));
        assert_eq!(f.device.state(), DeviceState::Idle);

        let handle = f.device.open(&back()).await.unwrap();
        assert_eq!(handle.identity(), &back());
        assert!(handle.is_open());
        assert_eq!(f.device.state(), DeviceState::Open);
        assert!(f.device.current().is_some());

        f.device.close().await.unwrap();
        assert_eq!(f.device.state(), DeviceState::Idle);
        assert!(!handle.is_open());
        assert_eq!(closes(&f.hardware), 1);
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_twice_closes_hardware_once() {
        let f = fixture(Duration::from_secs(2));
        f.device.open(&back()).await.unwrap();

        f.device.close().await.unwrap();
        f.device.close().await.unwrap();
        assert_eq!(f.device.state(), DeviceState::Idle);
        assert_eq!(closes(&f.hardware), 1);

        // Closing an acquisition that never opened touches no hardware
        let idle = fixture(Duration::from_secs(2));
        idle.device.close().await.unwrap();
        assert!(idle.hardware.calls().is_empty());
        f.executor.shutdown().await;
        idle.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_reopen_closes_previous_device_first() {
        let f = fixture(Duration::from_secs(2));
        let first = f.device.open(&back()).await.unwrap();
        let second = f.device.open(&CameraIdentity::new("1")).await.unwrap();

        assert!(!first.is_open());
        assert!(second.is_open());
        assert!(second.generation() > first.generation());
        assert_eq!(f.hardware.open_device_count(), 1);

        let calls = f.hardware.calls();
        let close_first = calls
            .iter()
            .position(|c| *c == HardwareCall::CloseDevice(back()))
            .unwrap();
        let open_second = calls
            .iter()
            .position(|c| *c == HardwareCall::Open(CameraIdentity::new("1")))
            .unwrap();
        assert!(close_first < open_second);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_error_auto_closes_partial_device() {
        let f = fixture(Duration::from_secs(2));
        f.hardware
            .set_open_behavior(OpenBehavior::Fail(HardwareError::CameraInUse));

        let result = f.device.open(&back()).await;
        assert_eq!(
            result.unwrap_err(),
            CameraError::OpenFailed {
                camera_id: "0".to_string(),
                source: HardwareError::CameraInUse,
            }
        );
        assert_eq!(f.device.state(), DeviceState::Idle);
        assert_eq!(closes(&f.hardware), 1);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_during_open() {
        let f = fixture(Duration::from_secs(2));
        f.hardware.set_open_behavior(OpenBehavior::Disconnect);

        let result = f.device.open(&back()).await;
        assert_eq!(result.unwrap_err(), CameraError::Disconnected("0".to_string()));
        assert_eq!(closes(&f.hardware), 1);
        assert_eq!(f.device.state(), DeviceState::Idle);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_synchronous_rejection() {
        let f = fixture(Duration::from_secs(2));
        f.hardware
            .set_open_behavior(OpenBehavior::Reject(HardwareError::Disabled));

        let result = f.device.open(&back()).await;
        assert!(matches!(
            result,
            Err(CameraError::OpenFailed {
                source: HardwareError::Disabled,
                ..
            })
        ));
        assert_eq!(f.device.state(), DeviceState::Idle);
        assert_eq!(closes(&f.hardware), 0);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_timeout_then_late_open_is_closed() {
        let f = fixture(Duration::from_millis(50));
        f.hardware.set_open_behavior(OpenBehavior::Hold);

        let result = f.device.open(&back()).await;
        assert_eq!(
            result.unwrap_err(),
            CameraError::CallbackTimeout {
                operation: Operation::Open,
                timeout: Duration::from_millis(50),
            }
        );
        assert_eq!(f.device.state(), DeviceState::Idle);

        assert!(f.hardware.release_held_open());
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || closes(&hardware) == 1).await);
        assert_eq!(f.hardware.open_device_count(), 0);
        assert!(f.device.current().is_none());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_open() {
        let f = fixture(Duration::from_secs(30));
        f.hardware.set_open_behavior(OpenBehavior::Hold);

        let opening = {
            let device = f.device.clone();
            tokio::spawn(async move { device.open(&back()).await })
        };
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || hardware.held_open_count() == 1).await);
        assert_eq!(f.device.state(), DeviceState::Opening);

        assert!(f.device.cancel_pending());
        assert_eq!(
            opening.await.unwrap().unwrap_err(),
            CameraError::Cancelled(Operation::Open)
        );
        assert_eq!(f.device.state(), DeviceState::Idle);

        f.hardware.release_held_open();
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || closes(&hardware) == 1).await);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_open_rolls_back() {
        let f = fixture(Duration::from_secs(30));
        f.hardware.set_open_behavior(OpenBehavior::Hold);

        let opening = {
            let device = f.device.clone();
            tokio::spawn(async move { device.open(&back()).await })
        };
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || hardware.held_open_count() == 1).await);
        opening.abort();
        assert!(opening.await.unwrap_err().is_cancelled());

        assert_eq!(f.device.state(), DeviceState::Idle);
        assert!(!f.device.cancel_pending());

        f.hardware.release_held_open();
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || closes(&hardware) == 1).await);
        assert_eq!(f.hardware.open_device_count(), 0);
        assert!(f.device.current().is_none());

        // The lock was released with the abandoned call
        f.hardware.set_open_behavior(OpenBehavior::Succeed);
        assert!(f.device.open(&back()).await.unwrap().is_open());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_lock_timeout_while_open_is_pending() {
        let f = fixture(Duration::from_secs(30));
        f.hardware.set_open_behavior(OpenBehavior::Hold);

        let opening = {
            let device = f.device.clone();
            tokio::spawn(async move { device.open(&back()).await })
        };
        let hardware = f.hardware.clone();
        assert!(wait_until(Duration::from_secs(2), move || hardware.held_open_count() == 1).await);

        assert_eq!(
            f.device.close().await,
            Err(CameraError::LockTimeout(Duration::from_millis(200)))
        );

        f.hardware.release_held_open();
        assert!(opening.await.unwrap().is_ok());
        f.device.close().await.unwrap();
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_after_open_releases_device() {
        let hardware = MockHardware::new();
        let executor = BackgroundExecutor::new("device-test");
        executor.start().unwrap();
        let releases = Arc::new(Mutex::new(Vec::new()));
        let device = DeviceAcquisition::new(
            Arc::new(hardware.clone()),
            executor.clone(),
            Duration::from_millis(200),
            Duration::from_secs(2),
        )
        .with_release_hook({
            let releases = releases.clone();
            Arc::new(move |handle: &DeviceHandle, reason: &DeviceRelease| {
                releases
                    .lock()
                    .unwrap()
                    .push((handle.identity().clone(), reason.clone()));
            })
        });

        let handle = device.open(&back()).await.unwrap();
        assert!(hardware.disconnect_device("0"));
        let watched = handle.clone();
        assert!(wait_until(Duration::from_secs(2), move || !watched.is_open()).await);

        assert_eq!(device.state(), DeviceState::Idle);
        assert!(device.current().is_none());
        assert_eq!(
            *releases.lock().unwrap(),
            vec![(back(), DeviceRelease::Disconnected)]
        );
        assert_eq!(hardware.call_count(|c| matches!(c, HardwareCall::CloseDevice(_))), 1);

        // A later close is a no-op for the hardware
        device.close().await.unwrap();
        assert_eq!(hardware.call_count(|c| matches!(c, HardwareCall::CloseDevice(_))), 1);
        assert!(hardware.violations().is_empty());
        executor.shutdown().await;
    }
}
