//! Integration tests for fleet coordination
//!
//! Real child processes (`sleep`, `true`) stand in for the emulator and
//! [`FrameServer`]s stand in for its scripting server.

#[cfg(test)]
mod routine_tests;

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::config::FleetConfig;
    use crate::connection::ControlConnection;
    use crate::fleet::Fleet;
    use crate::orchestrator::Orchestrator;
    use crate::process::EmulatorProcess;
    use crate::test_utils::{FrameServer, test_connection_config};

    /// Fleet timings scaled down for tests
    pub fn fast_fleet_config(instances: usize, base_port: u16) -> FleetConfig {
        FleetConfig {
            instances,
            base_port,
            stagger_ms: 5,
            settle_ms: 100,
            poll_interval_ms: 10,
            connect_attempts: 3,
            connect_retry_ms: 50,
            interrupt_grace_ms: 200,
        }
    }

    /// One orchestrator per process, instance `i` on `base_port + i`
    pub fn fleet_of(base_port: u16, processes: Vec<EmulatorProcess>) -> Fleet {
        let config = fast_fleet_config(processes.len(), base_port);
        let instances = processes
            .into_iter()
            .enumerate()
            .map(|(i, process)| {
                Orchestrator::new(
                    i,
                    process,
                    ControlConnection::new("127.0.0.1", config.port_for(i).unwrap(), test_connection_config()),
                )
            })
            .collect();
        Fleet::from_instances(config, instances)
    }

    /// `count` long-running instances, each with a listening server
    #[cfg(unix)]
    pub fn sleeper_fleet(count: usize) -> (Fleet, Vec<FrameServer>) {
        let (base, servers) = FrameServer::consecutive(count);
        let processes = (0..count).map(|_| crate::test_utils::sleeper(30)).collect();
        (fleet_of(base, processes), servers)
    }

    pub fn assert_all_torn_down(fleet: &Fleet) {
        for orch in fleet.instances() {
            assert!(
                !orch.process().is_running(),
                "instance {} still running",
                orch.index()
            );
            assert!(
                !orch.connection().is_connected(),
                "instance {} still connected",
                orch.index()
            );
        }
    }
}
