//! In-memory codec engine for tests.

use crate::error::{KilobyeError, Result};
use crate::media::pipeline::{CodecEngine, ProgressFn};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Inputs containing this marker make `exec` fail.
pub const CORRUPT_MARKER: &[u8] = b"corrupt";

#[derive(Debug, Default)]
pub struct FakeState {
    pub loads: usize,
    pub fail_load: bool,
    pub fail_delete: bool,
    pub fail_exec: bool,
    pub files: HashMap<String, Vec<u8>>,
    pub executed: Vec<Vec<String>>,
    /// Every progress fraction the engine reported, raw.
    pub reported: Vec<f64>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(state: &Arc<Mutex<FakeState>>) -> Self {
        Self {
            state: state.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CodecEngine for FakeEngine {
    async fn load(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.loads += 1;
        if state.fail_load {
            return Err(KilobyeError::EngineInitialization("fake load failure".into()));
        }
        Ok(())
    }

    async fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.lock().files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| KilobyeError::JobExecution(format!("no such file: {}", name)))
    }

    async fn delete_file(&mut self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_delete {
            return Err(KilobyeError::Cleanup(format!("cannot delete {}", name)));
        }
        state.files.remove(name);
        Ok(())
    }

    async fn exec(
        &mut self,
        args: &[String],
        _duration_secs: Option<f64>,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let input = {
            let mut state = self.lock();
            state.executed.push(args.to_vec());
            let input_name = args
                .windows(2)
                .find(|w| w[0] == "-i")
                .map(|w| w[1].clone())
                .unwrap_or_default();
            state.files.get(&input_name).cloned()
        };
        let input = match input {
            Some(input) => input,
            None => return Err(KilobyeError::JobExecution("input missing".into())),
        };

        for fraction in [f64::NAN, -0.2, 0.5, 0.4, 1.7] {
            self.lock().reported.push(fraction);
            progress(fraction);
        }

        let corrupt = input
            .windows(CORRUPT_MARKER.len())
            .any(|w| w == CORRUPT_MARKER);
        if corrupt || self.lock().fail_exec {
            return Err(KilobyeError::JobExecution("invalid data found".into()));
        }

        let output = match args.last() {
            Some(output) => output.clone(),
            None => return Err(KilobyeError::JobExecution("no output".into())),
        };
        let half = input.len().div_ceil(2).max(1);
        let encoded = input.iter().take(half).copied().collect();
        self.lock().files.insert(output, encoded);
        Ok(())
    }
}
