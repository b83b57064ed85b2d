use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{P2pFlowError, Result};
use crate::flow::{FlowContext, FlowHandle, FlowId, FlowLogic, FlowState};
use crate::message::SessionKey;
use crate::session::SessionManager;

use super::state::FlowTable;

/// Flow 调度器
///
/// 每个 flow 是一个 tokio 任务；`workers` 信号量限制同时执行的 flow 数量。
/// flow 只在两个挂起点之间持有许可，挂起等待消息时不占用 worker。
/// 任务经由构建时捕获的运行时句柄派生，因此可以从运行时之外的线程启动 flow。
#[derive(Clone)]
pub struct FlowScheduler {
    sessions: Arc<SessionManager>,
    flows: Arc<FlowTable>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    receive_timeout: Option<Duration>,
    runtime: Handle,
}

impl FlowScheduler {
    pub fn new(
        sessions: Arc<SessionManager>,
        worker_count: usize,
        receive_timeout: Option<Duration>,
        runtime: Handle,
    ) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            sessions,
            flows: Arc::new(FlowTable::new()),
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            receive_timeout,
            runtime,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 当前空闲的 worker 数
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub fn flows(&self) -> &Arc<FlowTable> {
        &self.flows
    }

    /// 由调用方启动的 flow，结果通过句柄观察
    pub fn start(&self, logic: Arc<dyn FlowLogic>) -> FlowHandle {
        self.spawn(FlowId::next(), logic, true)
    }

    /// 因 Initiate 准入而创建的响应方 flow，无人观察其结果
    pub fn start_responder(&self, id: FlowId, logic: Arc<dyn FlowLogic>) {
        drop(self.spawn(id, logic, false));
    }

    fn spawn(&self, id: FlowId, logic: Arc<dyn FlowLogic>, observed: bool) -> FlowHandle {
        let name = logic.name().to_string();
        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.flows.insert(id, name.clone(), observed, cancel_tx);
        let mut ctx = FlowContext::new(
            id,
            name.clone(),
            Arc::clone(&self.sessions),
            Arc::clone(&self.flows),
            Arc::clone(&self.workers),
            self.receive_timeout,
        );
        self.flows.set_state(id, FlowState::Runnable);
        debug!(flow = %id, name = %name, "flow runnable");

        let flows = Arc::clone(&self.flows);
        let sessions = Arc::clone(&self.sessions);
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                result = execute(logic.as_ref(), &mut ctx) => result,
                Ok(()) = cancel_rx => Err(P2pFlowError::Cancelled),
            };
            ctx.release_worker();

            let error = outcome.as_ref().err().map(|err| err.to_string());
            let closed = sessions.close_flow_sessions(id, error.clone());
            let state = match &outcome {
                Ok(_) => {
                    info!(flow = %id, closed, "flow completed");
                    FlowState::Completed
                }
                Err(err) => {
                    warn!(flow = %id, closed, %err, "flow failed");
                    FlowState::Failed
                }
            };
            flows.finish(id, state);
            let _ = result_tx.send(outcome);
        });

        FlowHandle::new(id, name, result_rx, Arc::clone(&self.flows))
    }

    /// 取消 flow：进入 Failed(Cancelled)，其会话全部关闭
    pub fn cancel(&self, id: FlowId) -> bool {
        match self.flows.take_cancel(id) {
            Some(cancel) => {
                info!(flow = %id, "cancelling flow");
                cancel.send(()).is_ok()
            }
            None => false,
        }
    }

    pub fn state(&self, id: FlowId) -> Option<FlowState> {
        self.flows.state(id)
    }

    pub fn suspended_on(&self, id: FlowId) -> Option<SessionKey> {
        self.flows.suspended_on(id)
    }

    pub fn outstanding(&self) -> usize {
        self.flows.outstanding()
    }
}

async fn execute(logic: &dyn FlowLogic, ctx: &mut FlowContext) -> Result<Value> {
    ctx.acquire_worker().await?;
    match AssertUnwindSafe(logic.call(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(P2pFlowError::FlowFailure(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("flow panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("flow panicked: {message}")
    } else {
        "flow panicked".to_string()
    }
}
