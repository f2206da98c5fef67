//! Create and delete helpers shared by the provisioning adapters

use std::fmt::Debug;

use kube::api::{Api, DeleteParams, PostParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use coach_common::retry::{retry_with_backoff, RetryConfig};
use coach_common::Error;

const CREATE_ATTEMPTS: u32 = 5;

/// Create `obj`, retrying transient faults; an existing object counts as created
pub(crate) async fn create_or_adopt<K>(
    api: &Api<K>,
    obj: &K,
    kind: &str,
    name: &str,
) -> Result<(), Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    retry_with_backoff(&RetryConfig::with_max_attempts(CREATE_ATTEMPTS), kind, || async move {
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(kind, name, "already exists");
                Ok(())
            }
            Err(e) => Err(Error::from(e)),
        }
    })
    .await
}

/// Delete `name`; a missing object counts as deleted
pub(crate) async fn delete_if_present<K>(
    api: &Api<K>,
    store: &str,
    kind: &str,
    name: &str,
) -> Result<(), Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(kind, name, "already gone");
            Ok(())
        }
        Err(e) => Err(Error::store(
            store,
            format!("failed to delete {} {}: {}", kind, name, e),
        )),
    }
}

/// In-process API server for adapter tests
///
/// Every request is recorded as `"<METHOD> <path>"` and answered by the
/// handler with a status code and a JSON body.
#[cfg(test)]
pub(crate) mod fake {
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    use http::{Method, Request, Response, StatusCode};
    use kube::client::Body;
    use kube::Client;
    use serde_json::{json, Value};

    pub(crate) type Calls = Arc<Mutex<Vec<String>>>;

    pub(crate) fn client<F>(handler: F) -> (Client, Calls)
    where
        F: Fn(&Method, &str) -> (StatusCode, Value) + Send + Sync + 'static,
    {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let handler = Arc::new(handler);
        let service = tower::service_fn(move |req: Request<Body>| {
            let handler = handler.clone();
            let recorded = recorded.clone();
            async move {
                let path = req.uri().path().to_string();
                recorded
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", req.method(), path));
                let (status, body) = handler(req.method(), &path);
                let response = Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }
        });
        (Client::new(service, "rl"), calls)
    }

    pub(crate) fn recorded(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().clone()
    }

    /// Minimal object body for a successful create, get or delete
    pub(crate) fn object(api_version: &str, kind: &str, name: &str) -> Value {
        json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": { "name": name },
        })
    }

    /// API server failure body
    pub(crate) fn status(code: u16, reason: &str) -> (StatusCode, Value) {
        let body = json!({
            "apiVersion": "v1",
            "kind": "Status",
            "status": "Failure",
            "message": format!("request failed: {}", reason),
            "reason": reason,
            "code": code,
        });
        (StatusCode::from_u16(code).unwrap(), body)
    }
}
