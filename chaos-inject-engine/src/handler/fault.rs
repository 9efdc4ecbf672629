use http::{Response, StatusCode};
use hyper::Body;
use thiserror::Error;
use tracing::error;

/// Injected by a `raise` effect (and a `return` effect for some status codes) into the guarded
/// operation. Callers see it exactly like an error the operation produced by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Fault {
    #[error("chaos fault")]
    Chaos,
    #[error("chaos fault injected into response")]
    Response,
    #[error("chaos fault injected into data access")]
    Access,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("operation timed out")]
    Timeout,
    #[error("service unavailable")]
    Unavailable,
}

const REGISTRY: &[(&str, Fault)] = &[
    ("ChaosFault", Fault::Chaos),
    ("ResponseFault", Fault::Response),
    ("AccessFault", Fault::Access),
    ("PermissionDenied", Fault::PermissionDenied),
    ("NotFound", Fault::NotFound),
    ("Timeout", Fault::Timeout),
    ("Unavailable", Fault::Unavailable),
];

impl Fault {
    /// Identifier a rule uses in its `exception` config entry.
    pub fn name(&self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, fault)| fault == self)
            .map(|(name, _)| *name)
            .unwrap_or("ChaosFault")
    }

    /// Identifiers may be qualified (`faults::NotFound`, `faults.NotFound`), only the last segment
    /// is significant.
    pub fn lookup(identifier: &str) -> Result<Fault, UnknownFault> {
        let identifier = identifier.trim();
        let name = identifier
            .rsplit(|c: char| c == '.' || c == ':')
            .next()
            .unwrap_or_default();
        if name.is_empty() {
            return Err(UnknownFault(identifier.to_string()));
        }
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, fault)| *fault)
            .ok_or_else(|| UnknownFault(identifier.to_string()))
    }

    /// Like [Fault::lookup], but an unresolvable identifier is logged and the given default is
    /// raised instead.
    pub fn resolve(identifier: &str, default: Fault) -> Fault {
        match Fault::lookup(identifier) {
            Ok(fault) => fault,
            Err(e) => {
                error!("could not raise configured fault: {}, raising {}", e, default.name());
                default
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Fault::PermissionDenied => StatusCode::FORBIDDEN,
            Fault::NotFound => StatusCode::NOT_FOUND,
            Fault::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Fault::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Fault::Chaos | Fault::Response | Fault::Access => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the fault the way a web layer renders an unhandled error.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = self.status_code();
        response
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fault identifier `{0}`")]
pub struct UnknownFault(pub String);
