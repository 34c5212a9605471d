#[cfg(test)]
mod session_manager_tests {
    use crabpreview::errors::{CameraError, Operation};
    use crabpreview::executor::BackgroundExecutor;
    use crabpreview::session::{DeviceAcquisition, DeviceHandle, SessionManager, SessionState};
    use crabpreview::testing::{
        wait_until, ConfigureBehavior, HardwareCall, MockHardware,
    };
    use crabpreview::types::{
        AfMode, CameraIdentity, CaptureRequest, Size, Surface, SurfaceId,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        hardware: MockHardware,
        executor: BackgroundExecutor,
        device: DeviceAcquisition,
        session: Arc<SessionManager>,
    }

    fn fixture(configure_timeout: Duration) -> Fixture {
        let hardware = MockHardware::new();
        let executor = BackgroundExecutor::new("session-test");
        executor.start().unwrap();
        let session = Arc::new(SessionManager::new(executor.clone(), configure_timeout));
        let device = DeviceAcquisition::new(
            Arc::new(hardware.clone()),
            executor.clone(),
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
        .with_release_hook(session.release_hook());
        Fixture {
            hardware,
            executor,
            device,
            session,
        }
    }

    fn surface(id: u64) -> Surface {
        Surface {
            id: SurfaceId(id),
            size: Size::new(1920, 1080),
        }
    }

    async fn open(f: &Fixture) -> DeviceHandle {
        f.device.open(&CameraIdentity::new("0")).await.unwrap()
    }

    fn teardown_tail(calls: &[HardwareCall]) -> Vec<HardwareCall> {
        calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    HardwareCall::StopRepeating
                        | HardwareCall::AbortCaptures
                        | HardwareCall::CloseSession
                        | HardwareCall::CloseDevice(_)
                )
            })
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_configure_and_repeat() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        assert_eq!(f.session.state(), SessionState::Closed);

        let info = f.session.configure(&handle, vec![surface(7)]).await.unwrap();
        assert_eq!(info.camera_id, CameraIdentity::new("0"));
        assert_eq!(info.device_generation, handle.generation());
        assert_eq!(f.session.state(), SessionState::Configured);

        let request = CaptureRequest::preview(vec![SurfaceId(7)]);
        f.session.start_repeating(request.clone()).await.unwrap();
        assert_eq!(f.session.state(), SessionState::Repeating);
        assert_eq!(f.session.current_request(), Some(request));
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_replacing_repeating_request_stops_previous_first() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.session.configure(&handle, vec![surface(1)]).await.unwrap();

        let first = CaptureRequest::preview(vec![SurfaceId(1)]);
        let second = first.clone().with_af_mode(AfMode::Auto);
        f.session.start_repeating(first.clone()).await.unwrap();
        f.session.start_repeating(second.clone()).await.unwrap();

        let repeats: Vec<_> = f
            .hardware
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    HardwareCall::SetRepeatingRequest(_) | HardwareCall::StopRepeating
                )
            })
            .collect();
        assert_eq!(
            repeats,
            vec![
                HardwareCall::SetRepeatingRequest(first),
                HardwareCall::StopRepeating,
                HardwareCall::SetRepeatingRequest(second),
            ]
        );
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.session.configure(&handle, vec![surface(1)]).await.unwrap();
        assert!(f.session.restart().await.is_err());

        f.session
            .start_repeating(CaptureRequest::preview(vec![SurfaceId(1)]))
            .await
            .unwrap();
        f.session.stop().await.unwrap();
        assert_eq!(f.session.state(), SessionState::Stopped);
        assert!(f.session.has_session());

        // Stopping twice is harmless
        f.session.stop().await.unwrap();
        assert_eq!(f.hardware.call_count(|c| *c == HardwareCall::StopRepeating), 1);

        f.session.restart().await.unwrap();
        assert_eq!(f.session.state(), SessionState::Repeating);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_teardown_order_on_device_close() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.session.configure(&handle, vec![surface(1)]).await.unwrap();
        f.session
            .start_repeating(CaptureRequest::preview(vec![SurfaceId(1)]))
            .await
            .unwrap();

        // Closing the device releases the session first through the hook
        f.device.close().await.unwrap();

        assert_eq!(
            teardown_tail(&f.hardware.calls()),
            vec![
                HardwareCall::StopRepeating,
                HardwareCall::AbortCaptures,
                HardwareCall::CloseSession,
                HardwareCall::CloseDevice(CameraIdentity::new("0")),
            ]
        );
        assert_eq!(f.session.state(), SessionState::Closed);
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.session.configure(&handle, vec![surface(1)]).await.unwrap();

        f.session.close().await.unwrap();
        f.session.close().await.unwrap();
        assert_eq!(f.hardware.call_count(|c| *c == HardwareCall::CloseSession), 1);
        assert_eq!(f.session.state(), SessionState::Closed);
        assert!(handle.is_open());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_failure_leaves_device_open() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.hardware.set_configure_behavior(ConfigureBehavior::Fail);

        let result = f.session.configure(&handle, vec![surface(1)]).await;
        assert!(matches!(result, Err(CameraError::ConfigureFailed(_))));
        assert!(handle.is_open());
        assert_eq!(f.session.state(), SessionState::Closed);

        // Retry succeeds on the same device
        f.hardware.set_configure_behavior(ConfigureBehavior::Succeed);
        f.session.configure(&handle, vec![surface(2)]).await.unwrap();
        assert_eq!(f.hardware.call_count(|c| matches!(c, HardwareCall::Open(_))), 1);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_requires_surfaces_and_open_device() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        assert_eq!(
            f.session.configure(&handle, Vec::new()).await,
            Err(CameraError::SurfaceUnavailable)
        );

        f.device.close().await.unwrap();
        assert!(matches!(
            f.session.configure(&handle, vec![surface(1)]).await,
            Err(CameraError::InvalidState(_))
        ));
        assert_eq!(
            f.hardware
                .call_count(|c| matches!(c, HardwareCall::CreateCaptureSession { .. })),
            0
        );
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_timeout_closes_late_session() {
        let f = fixture(Duration::from_millis(50));
        let handle = open(&f).await;
        f.hardware.set_configure_behavior(ConfigureBehavior::Hold);

        let result = f.session.configure(&handle, vec![surface(1)]).await;
        assert_eq!(
            result,
            Err(CameraError::CallbackTimeout {
                operation: Operation::Configure,
                timeout: Duration::from_millis(50),
            })
        );

        assert!(f.hardware.release_held_configure());
        let hardware = f.hardware.clone();
        assert!(
            wait_until(Duration::from_secs(2), move || {
                hardware.call_count(|c| *c == HardwareCall::CloseSession) == 1
            })
            .await
        );
        assert!(!f.session.has_session());
        assert_eq!(f.hardware.open_session_count(), 0);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_configure() {
        let f = fixture(Duration::from_secs(30));
        let handle = open(&f).await;
        f.hardware.set_configure_behavior(ConfigureBehavior::Hold);

        let configuring = {
            let session = f.session.clone();
            let handle = handle.clone();
            tokio::spawn(async move { session.configure(&handle, vec![surface(1)]).await })
        };
        let hardware = f.hardware.clone();
        assert!(
            wait_until(Duration::from_secs(2), move || hardware.held_configure_count() == 1).await
        );
        assert_eq!(f.session.state(), SessionState::Configuring);

        assert!(f.session.cancel_pending());
        assert_eq!(
            configuring.await.unwrap(),
            Err(CameraError::Cancelled(Operation::Configure))
        );
        assert_eq!(f.session.state(), SessionState::Closed);
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_configure_closes_late_session() {
        let f = fixture(Duration::from_secs(30));
        let handle = open(&f).await;
        f.hardware.set_configure_behavior(ConfigureBehavior::Hold);

        let configuring = {
            let session = f.session.clone();
            let handle = handle.clone();
            tokio::spawn(async move { session.configure(&handle, vec![surface(1)]).await })
        };
        let hardware = f.hardware.clone();
        assert!(
            wait_until(Duration::from_secs(2), move || hardware.held_configure_count() == 1).await
        );
        configuring.abort();
        assert!(configuring.await.unwrap_err().is_cancelled());
        assert_eq!(f.session.state(), SessionState::Closed);

        assert!(f.hardware.release_held_configure());
        let hardware = f.hardware.clone();
        assert!(
            wait_until(Duration::from_secs(2), move || {
                hardware.call_count(|c| *c == HardwareCall::CloseSession) == 1
            })
            .await
        );
        assert!(!f.session.has_session());
        assert_eq!(f.hardware.open_session_count(), 0);

        // The device is untouched and can be configured again
        f.hardware.set_configure_behavior(ConfigureBehavior::Succeed);
        f.session.configure(&handle, vec![surface(2)]).await.unwrap();
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_device_loss_tears_down_session() {
        let f = fixture(Duration::from_secs(2));
        let handle = open(&f).await;
        f.session.configure(&handle, vec![surface(1)]).await.unwrap();
        f.session
            .start_repeating(CaptureRequest::preview(vec![SurfaceId(1)]))
            .await
            .unwrap();

        assert!(f.hardware.disconnect_device("0"));
        let watched = handle.clone();
        assert!(wait_until(Duration::from_secs(2), move || !watched.is_open()).await);

        assert!(!f.session.has_session());
        assert_eq!(
            teardown_tail(&f.hardware.calls()),
            vec![
                HardwareCall::StopRepeating,
                HardwareCall::AbortCaptures,
                HardwareCall::CloseSession,
                HardwareCall::CloseDevice(CameraIdentity::new("0")),
            ]
        );
        assert!(f.hardware.violations().is_empty());
        f.executor.shutdown().await;
    }
}
