use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// One GPU memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySample {
    /// Memory in use across all GPUs, in MB.
    UsedMemoryMb(u64),
    /// The read failed or timed out. Treated as busy, never as idle.
    Unavailable,
}

impl TelemetrySample {
    /// Whether this sample counts towards idle time.
    pub fn is_idle(self, threshold_mb: u64) -> bool {
        match self {
            TelemetrySample::UsedMemoryMb(used) => used < threshold_mb,
            TelemetrySample::Unavailable => false,
        }
    }
}

/// Source of GPU memory readings. Reads never fail; failures map to
/// [`TelemetrySample::Unavailable`].
#[async_trait]
pub trait GpuTelemetrySource: Send + Sync {
    async fn sample(&self) -> TelemetrySample;
}

/// Reads `memory.used` from `nvidia-smi`.
pub struct NvidiaSmiTelemetry {
    program: String,
    timeout: Duration,
}

impl NvidiaSmiTelemetry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            timeout,
        }
    }

    /// Use a different executable with the same output format.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn query(&self) -> Result<u64, TelemetryError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--query-gpu=memory.used", "--format=csv,nounits,noheader"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TelemetryError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(TelemetryError::ExitStatus(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_memory_used(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl GpuTelemetrySource for NvidiaSmiTelemetry {
    async fn sample(&self) -> TelemetrySample {
        match self.query().await {
            Ok(used) => TelemetrySample::UsedMemoryMb(used),
            Err(e) => {
                tracing::warn!(error = %e, "GPU telemetry read failed, assuming busy");
                TelemetrySample::Unavailable
            }
        }
    }
}

/// Sum `memory.used` over every GPU line.
pub fn parse_memory_used(stdout: &str) -> Result<u64, TelemetryError> {
    let mut total = 0u64;
    let mut seen = false;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let used: u64 = line
            .parse()
            .map_err(|_| TelemetryError::Parse(line.to_string()))?;
        total = total.saturating_add(used);
        seen = true;
    }

    if seen {
        Ok(total)
    } else {
        Err(TelemetryError::Parse(stdout.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to run GPU query: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("GPU query timed out after {0:?}")]
    Timeout(Duration),

    #[error("GPU query exited with error: {0}")]
    ExitStatus(String),

    #[error("Unexpected GPU query output: {0:?}")]
    Parse(String),
}
