// vSphere / ESXi client over the JSON encoding of the Web Services API (`/sdk/vim25/<release>`).

mod wire;

use crate::config::CollectorConfig;
use crate::error::{HypervisorError, HypervisorResult};
use crate::hypervisor::{HypervisorConnector, HypervisorSession, PropertyBag, PropertyPage};
use crate::models::HostSummary;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use wire::{MoRef, ServiceContent};

const SESSION_HEADER: &str = "vmware-api-session-id";

pub struct VsphereConnector {
    client: reqwest::Client,
    api_release: String,
}

impl VsphereConnector {
    pub fn new(config: &CollectorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_release: config.api_release.clone(),
        })
    }
}

#[async_trait]
impl HypervisorConnector for VsphereConnector {
    #[instrument(skip(self, password), fields(hypervisor = "vsphere", operation = "connect"))]
    async fn connect(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> HypervisorResult<Box<dyn HypervisorSession>> {
        let base = format!("https://{}/sdk/vim25/{}", address, self.api_release);
        let unreachable = |e: reqwest::Error| HypervisorError::Connection {
            address: address.to_string(),
            reason: e.to_string(),
        };

        let resp = self
            .client
            .get(format!("{base}/ServiceInstance/ServiceInstance/content"))
            .send()
            .await
            .map_err(unreachable)?;
        let content: ServiceContent = decode_json("RetrieveServiceContent", resp).await?;

        let resp = self
            .client
            .post(format!(
                "{}/SessionManager/{}/Login",
                base, content.session_manager.value
            ))
            .json(&json!({ "userName": username, "password": password }))
            .send()
            .await
            .map_err(unreachable)?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return match wire::fault_of(&body) {
                (Some(kind), _) if kind == "InvalidLogin" => Err(HypervisorError::Authentication {
                    address: address.to_string(),
                }),
                (_, fault) => Err(HypervisorError::Protocol {
                    method: "Login".into(),
                    fault,
                }),
            };
        }
        let session_id = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| HypervisorError::Decode {
                method: "Login".into(),
                reason: format!("missing {SESSION_HEADER} header"),
            })?;

        debug!(host = %address, "vSphere session opened");
        Ok(Box::new(VsphereSession {
            client: self.client.clone(),
            base,
            address: address.to_string(),
            session_id,
            content,
            views: HashMap::new(),
            closed: false,
        }))
    }
}

pub struct VsphereSession {
    client: reqwest::Client,
    base: String,
    address: String,
    session_id: String,
    content: ServiceContent,
    /// Container views created by this session, by object type. Destroyed on disconnect.
    views: HashMap<String, MoRef>,
    closed: bool,
}

impl VsphereSession {
    async fn invoke(
        &self,
        target: &MoRef,
        method: &str,
        body: Option<Value>,
    ) -> HypervisorResult<Option<Value>> {
        if self.closed {
            return Err(HypervisorError::SessionClosed);
        }
        let url = format!("{}/{}/{}/{}", self.base, target.kind, target.value, method);
        let mut req = self
            .client
            .post(url)
            .header(SESSION_HEADER, &self.session_id);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (_, fault) = wire::fault_of(&body);
            return Err(HypervisorError::Protocol {
                method: method.to_string(),
                fault,
            });
        }
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| HypervisorError::Decode {
                method: method.to_string(),
                reason: e.to_string(),
            })
    }

    async fn container_view(&mut self, object_type: &str) -> HypervisorResult<MoRef> {
        if let Some(view) = self.views.get(object_type) {
            return Ok(view.clone());
        }
        let body = json!({
            "container": self.content.root_folder.to_json(),
            "type": [object_type],
            "recursive": true,
        });
        let view_manager = self.content.view_manager.clone();
        let value = self
            .invoke(&view_manager, "CreateContainerView", Some(body))
            .await?
            .ok_or_else(|| HypervisorError::Decode {
                method: "CreateContainerView".into(),
                reason: "empty response".into(),
            })?;
        let view: MoRef = serde_json::from_value(value).map_err(|e| HypervisorError::Decode {
            method: "CreateContainerView".into(),
            reason: e.to_string(),
        })?;
        self.views.insert(object_type.to_string(), view.clone());
        Ok(view)
    }

    async fn retrieve_ex(&self, spec: Value) -> HypervisorResult<PropertyPage> {
        let body = json!({
            "specSet": [spec],
            "options": { "_typeName": "RetrieveOptions" },
        });
        let pc = self.content.property_collector.clone();
        let result = self.invoke(&pc, "RetrievePropertiesEx", Some(body)).await?;
        wire::parse_retrieve_result("RetrievePropertiesEx", result)
    }

    async fn continue_ex(&self, token: &str) -> HypervisorResult<PropertyPage> {
        let pc = self.content.property_collector.clone();
        let result = self
            .invoke(
                &pc,
                "ContinueRetrievePropertiesEx",
                Some(json!({ "token": token })),
            )
            .await?;
        wire::parse_retrieve_result("ContinueRetrievePropertiesEx", result)
    }

    /// Every object of a query, following continuation tokens.
    async fn retrieve_all(&self, spec: Value) -> HypervisorResult<Vec<PropertyBag>> {
        let mut page = self.retrieve_ex(spec).await?;
        let mut out = Vec::new();
        loop {
            out.extend(page.objects.into_iter().map(|o| o.props));
            match page.token {
                Some(token) => page = self.continue_ex(&token).await?,
                None => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl HypervisorSession for VsphereSession {
    #[instrument(skip(self), fields(host = %self.address, operation = "host_summary"))]
    async fn host_summary(&mut self) -> HypervisorResult<HostSummary> {
        let view = self.container_view("HostSystem").await?;
        let hosts = self
            .retrieve_all(wire::view_filter_spec(
                &view,
                "HostSystem",
                wire::HOST_SUMMARY_PATHS,
            ))
            .await?;
        let host = hosts.into_iter().next().ok_or_else(|| HypervisorError::Decode {
            method: "RetrievePropertiesEx".into(),
            reason: "no HostSystem object".into(),
        })?;

        let refs = wire::datastore_refs(&host);
        let datastores = if refs.is_empty() {
            Vec::new()
        } else {
            self.retrieve_all(wire::object_filter_spec(
                &refs,
                "Datastore",
                wire::DATASTORE_PATHS,
            ))
            .await?
        };
        Ok(wire::host_summary(&host, &datastores))
    }

    async fn retrieve_properties(
        &mut self,
        object_type: &str,
        paths: &[&str],
    ) -> HypervisorResult<PropertyPage> {
        let view = self.container_view(object_type).await?;
        self.retrieve_ex(wire::view_filter_spec(&view, object_type, paths))
            .await
    }

    async fn continue_retrieve(&mut self, token: &str) -> HypervisorResult<PropertyPage> {
        self.continue_ex(token).await
    }

    async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        let views: Vec<MoRef> = self.views.drain().map(|(_, v)| v).collect();
        for view in views {
            if let Err(e) = self.invoke(&view, "DestroyView", None).await {
                debug!(host = %self.address, error = %e, "DestroyView failed");
            }
        }
        let session_manager = self.content.session_manager.clone();
        if let Err(e) = self.invoke(&session_manager, "Logout", None).await {
            warn!(host = %self.address, error = %e, "vSphere logout failed");
        }
        self.closed = true;
        debug!(host = %self.address, "vSphere session closed");
    }
}

impl Drop for VsphereSession {
    /// A session dropped mid-pass (panic or cancellation) still logs out in the background.
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let url = format!(
            "{}/SessionManager/{}/Logout",
            self.base, self.content.session_manager.value
        );
        let req = self
            .client
            .post(url)
            .header(SESSION_HEADER, self.session_id.clone());
        let address = self.address.clone();
        handle.spawn(async move {
            if let Err(e) = req.send().await {
                debug!(host = %address, error = %e, "background logout failed");
            }
        });
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    method: &str,
    resp: reqwest::Response,
) -> HypervisorResult<T> {
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        let (_, fault) = wire::fault_of(&body);
        return Err(HypervisorError::Protocol {
            method: method.to_string(),
            fault,
        });
    }
    let value: Value = resp.json().await?;
    serde_json::from_value(value).map_err(|e| HypervisorError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
