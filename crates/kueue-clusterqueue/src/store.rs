//! Object store access for ClusterQueues and ResourceFlavors

use async_trait::async_trait;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kueue_common::crd::{ClusterQueue, ResourceFlavor};
use kueue_common::FIELD_MANAGER;

use crate::Error;

/// Trait abstracting the Kubernetes API calls the controller makes
///
/// Allows the reference synchronizer and reconciler to be tested with a
/// mock while production uses [`KubeStore`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterQueueStore: Send + Sync {
    /// Fetch a ClusterQueue; `None` if it does not exist
    async fn get_cluster_queue(&self, name: &str) -> Result<Option<ClusterQueue>, Error>;

    /// Replace the whole status with `cq.status`, conditional on
    /// `cq.metadata.resourceVersion`
    async fn update_cluster_queue_status(&self, cq: &ClusterQueue) -> Result<(), Error>;

    /// List every ResourceFlavor
    async fn list_resource_flavors(&self) -> Result<Vec<ResourceFlavor>, Error>;

    /// Replace a ResourceFlavor, conditional on its resourceVersion
    async fn update_resource_flavor(&self, rf: &ResourceFlavor) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store backed by the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterQueueStore for KubeStore {
    async fn get_cluster_queue(&self, name: &str) -> Result<Option<ClusterQueue>, Error> {
        let api: Api<ClusterQueue> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn update_cluster_queue_status(&self, cq: &ClusterQueue) -> Result<(), Error> {
        let name = cq.name_any();
        let api: Api<ClusterQueue> = Api::all(self.client.clone());

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        // A full replace drops usage keys the new status no longer has; the
        // carried resourceVersion makes the API server reject stale writes with 409
        let body = serde_json::to_vec(cq).map_err(kube::Error::SerdeError)?;

        api.replace_status(&name, &params, body)
            .await
            .map_err(|e| Error::from_api("ClusterQueue", &name, e))?;

        debug!(cluster_queue = %name, "Updated ClusterQueue status");
        Ok(())
    }

    async fn list_resource_flavors(&self) -> Result<Vec<ResourceFlavor>, Error> {
        let api: Api<ResourceFlavor> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_resource_flavor(&self, rf: &ResourceFlavor) -> Result<(), Error> {
        let name = rf.name_any();
        let api: Api<ResourceFlavor> = Api::all(self.client.clone());
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        api.replace(&name, &params, rf)
            .await
            .map_err(|e| Error::from_api("ResourceFlavor", &name, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Request, Response, StatusCode};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::client::Body;
    use kueue_common::crd::{ClusterQueueSpec, ClusterQueueStatus, ResourceFlavorSpec};
    use std::collections::BTreeMap;
    use tower_test::mock;

    type ApiHandle = mock::Handle<Request<Body>, Response<Body>>;

    fn store() -> (KubeStore, ApiHandle) {
        let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        (KubeStore::new(Client::new(service, "default")), handle)
    }

    fn cluster_queue(used: &[(&str, &str)]) -> ClusterQueue {
        let mut cq = ClusterQueue::new("team-a", ClusterQueueSpec::default());
        cq.metadata.resource_version = Some("7".to_string());
        cq.status = Some(ClusterQueueStatus {
            used_resources: used
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                .collect::<BTreeMap<_, _>>(),
            admitted_workloads: 1,
            pending_workloads: 0,
        });
        cq
    }

    fn status_response(code: StatusCode, reason: &str) -> Response<Body> {
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code.as_u16(),
        });
        Response::builder()
            .status(code)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_write_replaces_the_whole_status() {
        let (store, mut handle) = store();
        // Only cpu is in use, so no other usage key may reach the server
        let cq = cluster_queue(&[("cpu", "2")]);
        let write = tokio::spawn(async move { store.update_cluster_queue_status(&cq).await });

        let (request, send) = handle.next_request().await.expect("no request sent");
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(
            request.uri().path(),
            "/apis/kueue.x-k8s.io/v1alpha1/clusterqueues/team-a/status"
        );
        let body = request.into_body().collect_bytes().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent["metadata"]["resourceVersion"], "7");
        assert_eq!(
            sent["status"],
            serde_json::json!({
                "usedResources": {"cpu": "2"},
                "admittedWorkloads": 1,
                "pendingWorkloads": 0,
            })
        );

        send.send_response(Response::builder().body(Body::from(body.to_vec())).unwrap());
        write.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_status_write_is_a_conflict() {
        let (store, mut handle) = store();
        let cq = cluster_queue(&[]);
        let write = tokio::spawn(async move { store.update_cluster_queue_status(&cq).await });

        let (_, send) = handle.next_request().await.expect("no request sent");
        send.send_response(status_response(StatusCode::CONFLICT, "Conflict"));

        let err = write.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict { kind: "ClusterQueue", name } if name == "team-a"
        ));
    }

    #[tokio::test]
    async fn missing_cluster_queue_reads_as_none() {
        let (store, mut handle) = store();
        let read = tokio::spawn(async move { store.get_cluster_queue("ghost").await });

        let (request, send) = handle.next_request().await.expect("no request sent");
        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.uri().path(),
            "/apis/kueue.x-k8s.io/v1alpha1/clusterqueues/ghost"
        );
        send.send_response(status_response(StatusCode::NOT_FOUND, "NotFound"));

        assert!(read.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn flavor_update_is_a_full_replace() {
        let (store, mut handle) = store();
        let mut rf = ResourceFlavor::new("spot", ResourceFlavorSpec::default());
        rf.metadata.resource_version = Some("3".to_string());
        rf.spec.cluster_queues.insert("team-a".to_string());
        let write = tokio::spawn(async move { store.update_resource_flavor(&rf).await });

        let (request, send) = handle.next_request().await.expect("no request sent");
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(
            request.uri().path(),
            "/apis/kueue.x-k8s.io/v1alpha1/resourceflavors/spot"
        );
        let body = request.into_body().collect_bytes().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent["spec"]["clusterQueues"], serde_json::json!(["team-a"]));

        send.send_response(Response::builder().body(Body::from(body.to_vec())).unwrap());
        write.await.unwrap().unwrap();
    }
}
