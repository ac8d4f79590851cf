//! Log Streamer (§4.6). Tails container logs and yields lines for SSE
//! fan-out, grounded on `original_source/.../api/logs.py`'s `_stream_logs`.

use async_stream::stream;
use futures::Stream;
use std::sync::Arc;

use crate::driver::ContainerDriver;

#[derive(Debug, Clone)]
pub enum LogEvent {
    Line(String),
    Error(String),
    Close,
}

/// Attaches to the container's log source (tail=50, follow indefinitely).
/// Always ends with a `Close` sentinel. Independent per call — no shared
/// broadcast for raw container logs.
pub fn stream_logs(driver: Arc<ContainerDriver>, container_name: String) -> impl Stream<Item = LogEvent> {
    stream! {
        let mut inner = driver.logs_stream(&container_name);
        futures::pin_mut!(inner);

        loop {
            match futures::StreamExt::next(&mut inner).await {
                Some(Ok(line)) => {
                    let decoded = line.trim().to_string();
                    if !decoded.is_empty() {
                        yield LogEvent::Line(decoded);
                    }
                }
                Some(Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })) => {
                    yield LogEvent::Error(format!("container {container_name} not found"));
                    break;
                }
                Some(Err(e)) => {
                    yield LogEvent::Error(e.to_string());
                    break;
                }
                None => break,
            }
        }
        yield LogEvent::Close;
    }
}
