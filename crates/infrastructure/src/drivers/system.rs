use async_trait::async_trait;
use domain::driver::Driver;
use domain::error::DriverError;
use serde::{Deserialize, Serialize};
use sysinfo::{ComponentExt, CpuExt, DiskExt, System as SysInfoSystem, SystemExt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemMetric {
    CpuUsagePercent,
    MemoryUsedPercent,
    DiskUsedPercent,
    /// Average temperature across every detected thermal component.
    /// If a named `component` is given, only that component is used.
    Temperature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub metric: SystemMetric,
    pub component: Option<String>,
    pub mount_point: Option<String>,
}

/// Reads one host metric via `sysinfo`. Host probes are blocking, so
/// each read is dispatched through `spawn_blocking` rather than
/// awaited directly on the supervisor's task.
pub struct SystemDriver {
    config: SystemConfig,
    system: SysInfoSystem,
}

impl SystemDriver {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            system: SysInfoSystem::new(),
        }
    }
}

fn resolve_metric(system: &mut SysInfoSystem, config: &SystemConfig) -> Result<f64, DriverError> {
    match config.metric {
        SystemMetric::CpuUsagePercent => {
            system.refresh_cpu();
            let cpus = system.cpus();
            if cpus.is_empty() {
                return Err(DriverError::Read("no CPUs reported".into()));
            }
            let total: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
            Ok((total / cpus.len() as f32) as f64)
        }
        SystemMetric::MemoryUsedPercent => {
            system.refresh_memory();
            let total = system.total_memory();
            if total == 0 {
                return Err(DriverError::Read("host reports zero total memory".into()));
            }
            Ok(system.used_memory() as f64 / total as f64 * 100.0)
        }
        SystemMetric::DiskUsedPercent => {
            system.refresh_disks_list();
            system.refresh_disks();
            let disk = match &config.mount_point {
                Some(mount) => system
                    .disks()
                    .iter()
                    .find(|d| d.mount_point().to_string_lossy() == *mount),
                None => system.disks().first(),
            }
            .ok_or_else(|| DriverError::Read("no matching disk found".into()))?;
            let total = disk.total_space();
            if total == 0 {
                return Err(DriverError::Read("disk reports zero total space".into()));
            }
            let used = total - disk.available_space();
            Ok(used as f64 / total as f64 * 100.0)
        }
        SystemMetric::Temperature => {
            system.refresh_components();
            let components = system.components();
            let matching: Vec<f32> = match &config.component {
                Some(name) => components
                    .iter()
                    .filter(|c| c.label() == name)
                    .map(|c| c.temperature())
                    .collect(),
                None => components.iter().map(|c| c.temperature()).collect(),
            };
            if matching.is_empty() {
                return Err(DriverError::Read(
                    "no thermal components reported a reading".into(),
                ));
            }
            Ok((matching.iter().sum::<f32>() / matching.len() as f32) as f64)
        }
    }
}

#[async_trait]
impl Driver for SystemDriver {
    async fn connect(&mut self) -> Result<(), DriverError> {
        self.system.refresh_all();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<f64, DriverError> {
        resolve_metric(&mut self.system, &self.config)
    }
}
