// src/io/async_ext.rs
//
// Async wrappers over the blocking session calls. Each call runs on tokio's
// blocking pool so driver waits never stall the async workers.

use std::sync::Arc;

use async_trait::async_trait;

use super::device::CanDevice;
use super::error::Result;
use super::types::{BoardInfo, ControllerStatus, ErrorInfo};
use super::CanFrame;

/// Async counterparts of the `CanDevice` operations.
///
/// A blocking job that panics or is cancelled surfaces as `CanError::Cancelled`.
#[async_trait]
pub trait AsyncCanDevice: Send + Sync {
    async fn connect_async(&self) -> Result<()>;
    async fn disconnect_async(&self) -> Result<()>;
    async fn read_board_info_async(&self) -> Result<BoardInfo>;
    async fn read_error_info_async(&self) -> Result<ErrorInfo>;
    async fn read_status_async(&self) -> Result<ControllerStatus>;
    async fn pending_frame_count_async(&self) -> Result<u32>;
    async fn receive_async(&self, wait_time_ms: i32) -> Result<Vec<CanFrame>>;
    async fn transmit_async(&self, frames: Vec<CanFrame>) -> Result<u32>;
    async fn transmit_data_async(&self, id: u32, data: Vec<u8>) -> Result<bool>;
}

#[async_trait]
impl AsyncCanDevice for Arc<CanDevice> {
    async fn connect_async(&self) -> Result<()> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.connect()).await?
    }

    async fn disconnect_async(&self) -> Result<()> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.disconnect()).await?;
        Ok(())
    }

    async fn read_board_info_async(&self) -> Result<BoardInfo> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.read_board_info()).await?
    }

    async fn read_error_info_async(&self) -> Result<ErrorInfo> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.read_error_info()).await?
    }

    async fn read_status_async(&self) -> Result<ControllerStatus> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.read_status()).await?
    }

    async fn pending_frame_count_async(&self) -> Result<u32> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.pending_frame_count()).await?
    }

    async fn receive_async(&self, wait_time_ms: i32) -> Result<Vec<CanFrame>> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.receive(wait_time_ms)).await?
    }

    async fn transmit_async(&self, frames: Vec<CanFrame>) -> Result<u32> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.transmit(&frames)).await?
    }

    async fn transmit_data_async(&self, id: u32, data: Vec<u8>) -> Result<bool> {
        let device = self.clone();
        tokio::task::spawn_blocking(move || device.transmit_data(id, &data)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::device::UsbCanConfig;
    use crate::io::mock::{MockDriver, MockOp};
    use crate::runtime::CanRuntime;

    #[tokio::test]
    async fn test_async_round_trip() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = runtime
            .usb_device(UsbCanConfig::default().with_error_polling(None))
            .unwrap();

        device.connect_async().await.unwrap();
        assert!(device.is_connected());

        driver.push_frames(
            device.identity().unwrap(),
            &[CanFrame::new(0x7E8, &[0x02, 0x41, 0x0D]).unwrap()],
        );
        assert_eq!(device.pending_frame_count_async().await.unwrap(), 1);
        let frames = device.receive_async(10).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x02, 0x41, 0x0D]);

        assert!(device.transmit_data_async(0x7DF, vec![0x02, 0x01, 0x0D]).await.unwrap());
        assert_eq!(
            device
                .transmit_async(vec![CanFrame::new(0x1, &[]).unwrap(); 3])
                .await
                .unwrap(),
            3
        );

        device.read_status_async().await.unwrap();
        device.read_board_info_async().await.unwrap();
        device.read_error_info_async().await.unwrap();

        device.disconnect_async().await.unwrap();
        assert!(!device.is_connected());
        assert_eq!(driver.call_count(MockOp::Close), 1);
    }

    #[tokio::test]
    async fn test_async_errors_pass_through() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = runtime
            .usb_device(UsbCanConfig::default().with_error_polling(None))
            .unwrap();

        assert!(device.receive_async(0).await.unwrap_err().is_invalid_state());
        driver.fail(MockOp::Open);
        assert!(device.connect_async().await.unwrap_err().is_device_operation());
    }
}
