use std::time::Duration;
use tokio::sync::mpsc;

/// 检测到断开后等待隧道稳定再重连
pub const RECONNECT_SETTLE_DELAY: Duration = Duration::from_millis(500);
/// 启动隧道后等待其就绪再检查状态
pub const POST_CONNECT_CHECK_DELAY: Duration = Duration::from_secs(2);

/// 组件之间的异步触发请求，由编排器事件循环执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Poll { delay: Duration },
    Reconnect { delay: Duration },
}

pub type TriggerSender = mpsc::UnboundedSender<Trigger>;
pub type TriggerReceiver = mpsc::UnboundedReceiver<Trigger>;

pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    mpsc::unbounded_channel()
}

/// 发送触发请求；事件循环已退出时忽略
pub fn send_trigger(sender: &TriggerSender, trigger: Trigger) {
    if sender.send(trigger).is_err() {
        log::debug!("Event loop stopped, dropping {:?}", trigger);
    }
}
