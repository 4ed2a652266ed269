//! Classification of Kubernetes API errors

/// The object does not exist (HTTP 404)
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// The object already exists or the write lost a resourceVersion race (HTTP 409)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// Transient failures worth retrying: conflicts, expired watches, throttling,
/// server and transport errors. Everything else aborts the operation.
pub fn is_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(e) => matches!(e.code, 409 | 410 | 429 | 500..=504),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}
