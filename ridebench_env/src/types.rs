//! Request and response shapes exchanged with the service under test.

use ridebench_core::{Coordinate, RequestStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// A push notification about one ride, as seen by a single actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// The service offered a ride to the chair
    ChairMatched { server_request_id: String },

    /// The rider evaluated the chair's ride
    ChairCompleted { server_request_id: String },

    UserDispatching { server_request_id: String },
    UserDispatched { server_request_id: String },
    UserCarrying { server_request_id: String },
    UserArrived { server_request_id: String },
    UserCompleted { server_request_id: String },
}

impl NotificationEvent {
    /// Service id of the ride the event is about.
    pub fn server_request_id(&self) -> &str {
        match self {
            Self::ChairMatched { server_request_id }
            | Self::ChairCompleted { server_request_id }
            | Self::UserDispatching { server_request_id }
            | Self::UserDispatched { server_request_id }
            | Self::UserCarrying { server_request_id }
            | Self::UserArrived { server_request_id }
            | Self::UserCompleted { server_request_id } => server_request_id,
        }
    }

    /// Ride status a user-side event reports, `None` for chair events.
    pub fn user_status(&self) -> Option<RequestStatus> {
        match self {
            Self::UserDispatching { .. } => Some(RequestStatus::Dispatching),
            Self::UserDispatched { .. } => Some(RequestStatus::Dispatched),
            Self::UserCarrying { .. } => Some(RequestStatus::Carrying),
            Self::UserArrived { .. } => Some(RequestStatus::Arrived),
            Self::UserCompleted { .. } => Some(RequestStatus::Completed),
            Self::ChairMatched { .. } | Self::ChairCompleted { .. } => None,
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::ChairMatched { .. } => "chair_matched",
            Self::ChairCompleted { .. } => "chair_completed",
            Self::UserDispatching { .. } => "user_dispatching",
            Self::UserDispatched { .. } => "user_dispatched",
            Self::UserCarrying { .. } => "user_carrying",
            Self::UserArrived { .. } => "user_arrived",
            Self::UserCompleted { .. } => "user_completed",
        };
        write!(f, "{}({})", kind, self.server_request_id())
    }
}

/// Receiving end of an open notification stream.
pub type NotificationFeed = mpsc::Receiver<NotificationEvent>;

/// Sending end held by whoever produces the stream.
pub type NotificationSink = mpsc::Sender<NotificationEvent>;

/// Opens an in-process notification stream.
pub fn notification_stream(capacity: usize) -> (NotificationSink, NotificationFeed) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub date_of_birth: String,
    pub invitation_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOwnerRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterChairRequest {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRideRequest {
    pub pickup: Coordinate,
    pub destination: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRide {
    pub server_request_id: String,
}

/// Acknowledgement of a coordinate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateAck {
    /// Service time (ms) the coordinate was recorded at
    pub recorded_at: i64,
}

/// Ride as the chair side sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideDetail {
    pub server_request_id: String,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub status: RequestStatus,
}

/// Result of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationAck {
    /// Amount the user was charged
    pub fare: i64,

    /// Service time (ms) the ride was completed at
    pub completed_at: i64,
}

/// One entry of an owner's chair roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerChair {
    pub id: String,
    pub name: String,
    pub model: String,
    pub active: bool,
    pub registered_at: i64,
    pub total_distance: i64,

    /// Service time (ms) of the distance checkpoint, absent before the first report
    pub total_distance_updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChairSales {
    pub id: String,
    pub name: String,
    pub sales: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSales {
    pub model: String,
    pub sales: i64,
}

/// Sales summary reported for an owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSales {
    pub total_sales: i64,
    pub chairs: Vec<ChairSales>,
    pub models: Vec<ModelSales>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = NotificationEvent::UserCarrying {
            server_request_id: "r-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_carrying");
        assert_eq!(json["server_request_id"], "r-1");

        let back: NotificationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_user_status_mapping() {
        let matched = NotificationEvent::ChairMatched {
            server_request_id: "r".into(),
        };
        assert_eq!(matched.user_status(), None);
        assert_eq!(matched.to_string(), "chair_matched(r)");

        let arrived = NotificationEvent::UserArrived {
            server_request_id: "r".into(),
        };
        assert_eq!(arrived.user_status(), Some(RequestStatus::Arrived));
    }

    #[tokio::test]
    async fn test_notification_stream_delivers_in_order() {
        let (sink, mut feed) = notification_stream(4);
        for id in ["a", "b"] {
            sink.send(NotificationEvent::ChairMatched {
                server_request_id: id.into(),
            })
            .await
            .unwrap();
        }
        drop(sink);
        assert_eq!(feed.recv().await.unwrap().server_request_id(), "a");
        assert_eq!(feed.recv().await.unwrap().server_request_id(), "b");
        assert!(feed.recv().await.is_none());
    }
}
