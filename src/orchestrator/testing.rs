//! 编排器测试用的内存替身

use anyhow::{anyhow, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::ChannelError;
use crate::models::{
    EndpointConfig, EndpointKind, ForwardKind, PortForward, ProxySettings, SshParams,
};
use crate::native::{NativeHost, NativeRequest, NativeResponse};
use crate::system::ProxyBackend;

/// 按顺序返回预设响应的助手进程
#[derive(Default)]
pub struct ScriptedHost {
    responses: Mutex<VecDeque<Result<NativeResponse, ChannelError>>>,
    calls: Mutex<Vec<NativeRequest>>,
    gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 每次调用都会等待 `gate` 放行
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn push(&self, response: Result<NativeResponse, ChannelError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_json(&self, json: serde_json::Value) {
        self.push(Ok(serde_json::from_value(json).unwrap()));
    }

    pub fn calls(&self) -> Vec<NativeRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_identifiers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|r| r.endpoint_identifier)
            .collect()
    }
}

impl NativeHost for ScriptedHost {
    fn call(&self, request: NativeRequest) -> BoxFuture<'_, Result<NativeResponse, ChannelError>> {
        self.calls.lock().unwrap().push(request);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ChannelError::NoResponse));
        let gate = self.gate.clone();
        self.entered.notify_one();
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            response
        }
        .boxed()
    }
}

/// 记录设置变更的系统代理
pub struct RecordingProxy {
    current: Mutex<ProxySettings>,
    applied: Mutex<Vec<ProxySettings>>,
    fail: Mutex<bool>,
}

impl RecordingProxy {
    pub fn new(initial: ProxySettings) -> Self {
        Self {
            current: Mutex::new(initial),
            applied: Mutex::new(vec![]),
            fail: Mutex::new(false),
        }
    }

    pub fn current(&self) -> ProxySettings {
        self.current.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<ProxySettings> {
        self.applied.lock().unwrap().clone()
    }

    pub fn fail_applies(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl ProxyBackend for RecordingProxy {
    fn snapshot(&self) -> Result<ProxySettings> {
        Ok(self.current())
    }

    fn apply(&self, settings: &ProxySettings) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("gsettings failed"));
        }
        self.applied.lock().unwrap().push(settings.clone());
        *self.current.lock().unwrap() = settings.clone();
        Ok(())
    }
}

pub fn ssh_endpoint(id: &str, host: &str, socks_port: u16) -> EndpointConfig {
    EndpointConfig {
        id: id.to_string(),
        name: id.to_string(),
        kind: EndpointKind::Ssh(SshParams {
            host: host.to_string(),
            user: "root".to_string(),
            ..Default::default()
        }),
        port_forwards: vec![PortForward {
            kind: ForwardKind::Dynamic,
            local_port: socks_port,
            remote_host: None,
            remote_port: None,
        }],
        enabled: true,
        dynamic_port: None,
    }
}
