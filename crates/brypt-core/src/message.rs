//! The router/message contract: a `Parcel` travels through route
//! handlers, which reply through a `Next` handle rather than returning a
//! value directly, so a handler can defer a decision to a later tick.

use crate::identifier::NodeIdentifier;

/// Where a parcel is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Direct(NodeIdentifier),
    Cluster(Vec<NodeIdentifier>),
    Network,
}

/// HTTP-shaped status codes used to report a handler's outcome, plus
/// `Unknown` for any value outside the recognized set: `next_respond`
/// leaves behavior unchanged for unrecognized codes rather than rejecting
/// them (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Created,
    Accepted,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    InternalError,
    NotImplemented,
    ServiceUnavailable,
    Unknown(u16),
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::Conflict => 409,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::Unknown(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            202 => StatusCode::Accepted,
            204 => StatusCode::NoContent,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            409 => StatusCode::Conflict,
            413 => StatusCode::PayloadTooLarge,
            500 => StatusCode::InternalError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            other => StatusCode::Unknown(other),
        }
    }
}

/// A message traveling through the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parcel {
    pub source: NodeIdentifier,
    pub destination: Destination,
    pub route: String,
    pub payload: Vec<u8>,
    pub status: Option<StatusCode>,
    pub tracker_key: Option<crate::tracking::TrackerKey>,
}

impl Parcel {
    pub fn new(source: NodeIdentifier, destination: Destination, route: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            source,
            destination,
            route: route.into(),
            payload,
            status: None,
            tracker_key: None,
        }
    }
}

/// What a route handler may do with a parcel it has finished processing.
/// Named `Next` because it is handed to the handler as its continuation
/// rather than being a return value, letting a handler `defer` a decision
/// to a later scheduler tick instead of blocking the current one.
pub enum NextAction {
    Respond { status: StatusCode, payload: Vec<u8> },
    Dispatch { destination: Destination, route: String, payload: Vec<u8> },
    Defer { tracker_key: crate::tracking::TrackerKey, notice: Vec<u8>, response: Option<Vec<u8>> },
}

/// The handle a route handler receives in place of a return value.
pub struct Next {
    action: Option<NextAction>,
}

impl Next {
    pub fn new() -> Self {
        Self { action: None }
    }

    pub fn respond(&mut self, status: StatusCode, payload: Vec<u8>) {
        self.action = Some(NextAction::Respond { status, payload });
    }

    pub fn dispatch(&mut self, destination: Destination, route: impl Into<String>, payload: Vec<u8>) {
        self.action = Some(NextAction::Dispatch { destination, route: route.into(), payload });
    }

    /// Defers the handler's decision to a later tick. `notice` is the
    /// payload correlated against whatever resumes the deferred parcel;
    /// `response`, if already known, lets a later resumption respond
    /// immediately instead of recomputing it. Returns the tracker key the
    /// caller correlates the eventual resumption against.
    pub fn defer(&mut self, notice: Vec<u8>, response: Option<Vec<u8>>) -> crate::tracking::TrackerKey {
        let tracker_key = crate::tracking::TrackerKey::generate_from(&notice);
        self.action = Some(NextAction::Defer { tracker_key, notice, response });
        tracker_key
    }

    pub fn into_action(self) -> Option<NextAction> {
        self.action
    }
}

impl Default for Next {
    fn default() -> Self {
        Self::new()
    }
}
