use std::sync::Arc;

use ticketdesk_core::{
    ChangeExecutor, CommandOrchestrator, Config, EventHub, TelemetryStore, TicketStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    ticket_store: Arc<dyn TicketStore>,
    telemetry_store: Arc<dyn TelemetryStore>,
    hub: EventHub,
    orchestrator: Arc<CommandOrchestrator>,
    executor: ChangeExecutor,
}

impl AppState {
    pub fn new(
        config: Config,
        ticket_store: Arc<dyn TicketStore>,
        telemetry_store: Arc<dyn TelemetryStore>,
        hub: EventHub,
        orchestrator: Arc<CommandOrchestrator>,
    ) -> Self {
        let executor = ChangeExecutor::new(Arc::clone(&ticket_store));
        Self {
            config,
            ticket_store,
            telemetry_store,
            hub,
            orchestrator,
            executor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ticket_store(&self) -> &dyn TicketStore {
        self.ticket_store.as_ref()
    }

    pub fn telemetry_store(&self) -> &dyn TelemetryStore {
        self.telemetry_store.as_ref()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn orchestrator(&self) -> &Arc<CommandOrchestrator> {
        &self.orchestrator
    }

    pub fn executor(&self) -> &ChangeExecutor {
        &self.executor
    }
}
