use std::sync::Arc;

use async_trait::async_trait;
use futures::{future, stream::BoxStream, StreamExt};
use model::TrackingId;
use reqwest::Method;
use tracking::{
    adapter::ChannelMessage,
    subscription::{LatestFix, PushChannel, SubscribeAck},
    SubscriptionFailure, TrackingError, TrackingResult,
};

use crate::{client::DispatchApiClient, sse::SseParser, ApiError};

/// The backend's live channel: subscription bookkeeping over plain HTTP and
/// the position updates as a server-sent event stream.
pub struct HttpPushChannel {
    client: Arc<DispatchApiClient>,
}

impl HttpPushChannel {
    pub fn new(client: Arc<DispatchApiClient>) -> Self {
        Self { client }
    }

    fn endpoint(tracking_id: &TrackingId, action: &str) -> String {
        format!("tracking/{}/{}", tracking_id, action)
    }
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn subscribe(&self, tracking_id: &TrackingId) -> TrackingResult<SubscribeAck> {
        let endpoint = Self::endpoint(tracking_id, "subscribe");
        match self.client.json(Method::POST, &endpoint).await {
            Ok(Some(ack)) => Ok(ack),
            Ok(None) => Err(SubscriptionFailure::Rejected(Some("empty ack".to_owned())).into()),
            Err(ApiError::NotFound(_)) => Err(SubscriptionFailure::Rejected(Some(format!(
                "unknown delivery {}",
                tracking_id
            )))
            .into()),
            Err(ApiError::RequestError(why)) if why.is_timeout() => {
                Err(SubscriptionFailure::Timeout.into())
            }
            Err(ApiError::RequestError(why)) if why.is_connect() => {
                Err(SubscriptionFailure::Disconnected.into())
            }
            Err(why) => Err(why.into()),
        }
    }

    async fn latest(&self, tracking_id: &TrackingId) -> TrackingResult<Option<LatestFix>> {
        let endpoint = Self::endpoint(tracking_id, "latest");
        match self.client.json(Method::GET, &endpoint).await {
            Ok(latest) => Ok(latest),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(why) => Err(why.into()),
        }
    }

    async fn unsubscribe(&self, tracking_id: &TrackingId) -> TrackingResult<()> {
        let endpoint = Self::endpoint(tracking_id, "unsubscribe");
        self.client
            .send(self.client.request(Method::POST, &endpoint))
            .await?;
        Ok(())
    }

    async fn events(
        &self,
        tracking_id: &TrackingId,
    ) -> TrackingResult<BoxStream<'static, ChannelMessage>> {
        let endpoint = Self::endpoint(tracking_id, "events");
        let request = self
            .client
            .request(Method::GET, &endpoint)
            .header("accept", "text/event-stream");
        let response = self.client.send(request).await.map_err(|why| -> TrackingError {
            match why {
                ApiError::RequestError(_) => SubscriptionFailure::Disconnected.into(),
                other => other.into(),
            }
        })?;

        let messages = response
            .bytes_stream()
            .scan(SseParser::new(), |parser, chunk| {
                future::ready(match chunk {
                    Ok(chunk) => Some(futures::stream::iter(parser.feed(&chunk))),
                    Err(why) => {
                        log::warn!("event stream broke off: {}", why);
                        None
                    }
                })
            })
            .flatten();
        Ok(Box::pin(messages))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Response;

    #[test]
    fn endpoints_are_scoped_by_tracking_id() {
        let id = TrackingId::new("D-17".to_owned());
        assert_eq!(HttpPushChannel::endpoint(&id, "subscribe"), "tracking/D-17/subscribe");
    }

    #[test]
    fn acks_in_both_dialects() {
        let wrapped: Response<SubscribeAck> = serde_json::from_value(json!({
            "data": { "ok": true, "latest": { "driverId": "drv-1", "coordinates": [13.4, 52.5] } }
        }))
        .unwrap();
        let ack = wrapped.into_inner();
        assert!(ack.ok);
        assert_eq!(ack.identity().map(|id| id.to_string()), Some("drv-1".to_owned()));

        let bare: Response<SubscribeAck> =
            serde_json::from_value(json!({ "ok": false, "error": "expired" })).unwrap();
        let ack = bare.into_inner();
        assert!(!ack.ok);
        assert_eq!(ack.identity(), None);
        assert_eq!(ack.error.as_deref(), Some("expired"));
    }
}
