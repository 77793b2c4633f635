//! The plugin pipeline.
//!
//! Plugins transform audio before detection and candidates after it. They
//! run in registration order; cleanup runs in reverse order, on teardown and
//! on fatal pipeline failure alike. Any hook error aborts the current parse.

use log::{debug, warn};

use beatgrid_analysis::BeatCandidate;

use crate::config::ParserConfig;
use crate::errors::{CoreResult, Error};

/// Bounds on how much a `process_audio` hook may change the sample count.
const AUDIO_LENGTH_TOLERANCE: f64 = 0.1;

/// A parser extension with optional lifecycle and transform hooks.
///
/// Every hook has a default no-op implementation, so a plugin only
/// implements the seams it cares about.
pub trait ParserPlugin: Send {
    /// Unique name; registration rejects duplicates.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Invoked once, before the first parse that uses this plugin.
    ///
    /// # Errors
    ///
    /// Any error aborts the parse as a `PluginFailure`.
    fn initialize(&mut self, _config: &ParserConfig) -> Result<(), String> {
        Ok(())
    }

    /// Transform standardized audio before detection.
    ///
    /// The sample rate must be preserved, and the output length must stay
    /// within ±10% of the input length.
    ///
    /// # Errors
    ///
    /// Any error aborts the parse as a `PluginFailure`.
    fn process_audio(&mut self, samples: Vec<f32>, _config: &ParserConfig) -> Result<Vec<f32>, String> {
        Ok(samples)
    }

    /// Transform beat candidates after detection, before selection.
    ///
    /// Candidates may be reordered or dropped, but timestamps must stay
    /// within `[0, duration]`.
    ///
    /// # Errors
    ///
    /// Any error aborts the parse as a `PluginFailure`.
    fn process_beats(
        &mut self,
        candidates: Vec<BeatCandidate>,
        _config: &ParserConfig,
    ) -> Result<Vec<BeatCandidate>, String> {
        Ok(candidates)
    }

    /// Invoked on parser teardown, in reverse registration order.
    fn cleanup(&mut self) {}
}

/// The ordered plugin registry.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn ParserPlugin>>,
    initialized: bool,
    cleaned_up: bool,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Append a plugin to the execution order.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on a duplicate name.
    pub fn register(&mut self, plugin: Box<dyn ParserPlugin>) -> CoreResult<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::InvalidConfig(format!(
                "plugin '{}' is already registered",
                plugin.name()
            )));
        }
        debug!("registered plugin '{}' v{}", plugin.name(), plugin.version());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Remove a plugin by name, running its cleanup hook.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when no such plugin is registered.
    pub fn remove(&mut self, name: &str) -> CoreResult<()> {
        let Some(index) = self.plugins.iter().position(|p| p.name() == name) else {
            return Err(Error::InvalidConfig(format!(
                "plugin '{name}' is not registered"
            )));
        };
        let mut plugin = self.plugins.remove(index);
        if self.initialized {
            plugin.cleanup();
        }
        Ok(())
    }

    /// Run every `initialize` hook once, in registration order.
    ///
    /// # Errors
    ///
    /// `PluginFailure` naming the failing plugin; already-initialized
    /// plugins are cleaned up.
    pub fn initialize(&mut self, config: &ParserConfig) -> CoreResult<()> {
        if self.initialized {
            return Ok(());
        }
        for index in 0..self.plugins.len() {
            if let Err(message) = self.plugins[index].initialize(config) {
                let name = self.plugins[index].name().to_string();
                // unwind the ones that did come up
                for initialized in self.plugins[..index].iter_mut().rev() {
                    initialized.cleanup();
                }
                return Err(Error::PluginFailure {
                    plugin: name,
                    message,
                });
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Chain every `process_audio` hook over `samples`.
    ///
    /// # Errors
    ///
    /// `PluginFailure` when a hook errors or stretches the length beyond
    /// ±10%.
    pub fn process_audio(
        &mut self,
        mut samples: Vec<f32>,
        config: &ParserConfig,
    ) -> CoreResult<Vec<f32>> {
        for plugin in &mut self.plugins {
            let input_len = samples.len();
            let name = plugin.name().to_string();
            samples = plugin
                .process_audio(samples, config)
                .map_err(|message| Error::PluginFailure {
                    plugin: name.clone(),
                    message,
                })?;

            #[allow(clippy::cast_precision_loss)]
            let drift =
                (samples.len() as f64 - input_len as f64).abs() / (input_len as f64).max(1.);
            if drift > AUDIO_LENGTH_TOLERANCE {
                return Err(Error::PluginFailure {
                    plugin: name,
                    message: format!(
                        "audio length changed from {input_len} to {} samples, beyond the ±10% bound",
                        samples.len()
                    ),
                });
            }
        }
        Ok(samples)
    }

    /// Chain every `process_beats` hook over `candidates`.
    ///
    /// # Errors
    ///
    /// `PluginFailure` when a hook errors or invents a timestamp outside
    /// `[0, duration]`.
    pub fn process_beats(
        &mut self,
        mut candidates: Vec<BeatCandidate>,
        duration: f64,
        config: &ParserConfig,
    ) -> CoreResult<Vec<BeatCandidate>> {
        for plugin in &mut self.plugins {
            let name = plugin.name().to_string();
            candidates = plugin
                .process_beats(candidates, config)
                .map_err(|message| Error::PluginFailure {
                    plugin: name.clone(),
                    message,
                })?;

            if let Some(stray) = candidates
                .iter()
                .find(|c| c.timestamp < 0. || c.timestamp > duration)
            {
                return Err(Error::PluginFailure {
                    plugin: name,
                    message: format!(
                        "candidate at {:.3}s lies outside the audio (0..{duration:.3}s)",
                        stray.timestamp
                    ),
                });
            }
        }
        Ok(candidates)
    }

    /// Run every `cleanup` hook in reverse registration order. Idempotent.
    pub fn cleanup(&mut self) {
        if self.cleaned_up || !self.initialized {
            self.cleaned_up = true;
            return;
        }
        for plugin in self.plugins.iter_mut().rev() {
            debug!("cleaning up plugin '{}'", plugin.name());
            plugin.cleanup();
        }
        self.cleaned_up = true;
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        if !self.cleaned_up && self.initialized {
            warn!("plugin registry dropped without cleanup; running hooks now");
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatgrid_analysis::CandidateSource;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Records lifecycle events into a shared journal.
    struct JournalPlugin {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_on_initialize: bool,
        fail_on_audio: bool,
        audio_stretch: f64,
        beat_shift: f64,
    }

    impl JournalPlugin {
        fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                fail_on_initialize: false,
                fail_on_audio: false,
                audio_stretch: 1.,
                beat_shift: 0.,
            })
        }
    }

    impl ParserPlugin for JournalPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&mut self, _config: &ParserConfig) -> Result<(), String> {
            self.journal.lock().unwrap().push(format!("init {}", self.name));
            if self.fail_on_initialize {
                return Err("refused to start".into());
            }
            Ok(())
        }

        fn process_audio(
            &mut self,
            samples: Vec<f32>,
            _config: &ParserConfig,
        ) -> Result<Vec<f32>, String> {
            self.journal.lock().unwrap().push(format!("audio {}", self.name));
            if self.fail_on_audio {
                return Err("bad audio".into());
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let target = (samples.len() as f64 * self.audio_stretch) as usize;
            let mut output = samples;
            output.resize(target, 0.);
            Ok(output)
        }

        fn process_beats(
            &mut self,
            candidates: Vec<BeatCandidate>,
            _config: &ParserConfig,
        ) -> Result<Vec<BeatCandidate>, String> {
            self.journal.lock().unwrap().push(format!("beats {}", self.name));
            Ok(candidates
                .into_iter()
                .map(|c| BeatCandidate {
                    timestamp: c.timestamp + self.beat_shift,
                    ..c
                })
                .collect())
        }

        fn cleanup(&mut self) {
            self.journal.lock().unwrap().push(format!("cleanup {}", self.name));
        }
    }

    fn candidate(timestamp: f64) -> BeatCandidate {
        BeatCandidate {
            timestamp,
            confidence: 0.8,
            strength: 1.,
            source: CandidateSource::Onset,
        }
    }

    #[test]
    fn test_hooks_run_in_registration_order_cleanup_reversed() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(JournalPlugin::new("a", &journal)).unwrap();
        registry.register(JournalPlugin::new("b", &journal)).unwrap();

        let config = ParserConfig::default();
        registry.initialize(&config).unwrap();
        registry.process_audio(vec![0.; 100], &config).unwrap();
        registry
            .process_beats(vec![candidate(0.5)], 1., &config)
            .unwrap();
        registry.cleanup();

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "init a", "init b", "audio a", "audio b", "beats a", "beats b", "cleanup b",
                "cleanup a",
            ]
        );
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(JournalPlugin::new("dup", &journal)).unwrap();
        assert!(registry.register(JournalPlugin::new("dup", &journal)).is_err());
    }

    #[test]
    fn test_initialize_failure_unwinds_earlier_plugins() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(JournalPlugin::new("ok", &journal)).unwrap();
        let mut failing = JournalPlugin::new("bad", &journal);
        failing.fail_on_initialize = true;
        registry.register(failing).unwrap();

        let error = registry.initialize(&ParserConfig::default()).unwrap_err();
        assert!(matches!(
            error,
            Error::PluginFailure { plugin, .. } if plugin == "bad"
        ));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["init ok", "init bad", "cleanup ok"]
        );
    }

    #[test]
    fn test_audio_hook_failure_names_plugin() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        let mut failing = JournalPlugin::new("noisy", &journal);
        failing.fail_on_audio = true;
        registry.register(failing).unwrap();
        registry.initialize(&ParserConfig::default()).unwrap();

        let error = registry
            .process_audio(vec![0.; 10], &ParserConfig::default())
            .unwrap_err();
        assert!(matches!(
            error,
            Error::PluginFailure { plugin, .. } if plugin == "noisy"
        ));
    }

    #[test]
    fn test_audio_length_drift_beyond_bound_fails() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        let mut stretching = JournalPlugin::new("stretch", &journal);
        stretching.audio_stretch = 1.5;
        registry.register(stretching).unwrap();
        registry.initialize(&ParserConfig::default()).unwrap();

        assert!(
            registry
                .process_audio(vec![0.; 100], &ParserConfig::default())
                .is_err()
        );
    }

    #[test]
    fn test_audio_length_drift_within_bound_passes() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        let mut trimming = JournalPlugin::new("trim", &journal);
        trimming.audio_stretch = 0.95;
        registry.register(trimming).unwrap();
        registry.initialize(&ParserConfig::default()).unwrap();

        let output = registry
            .process_audio(vec![0.; 100], &ParserConfig::default())
            .unwrap();
        assert_eq!(output.len(), 95);
    }

    #[test]
    fn test_beats_outside_duration_fail() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        let mut shifting = JournalPlugin::new("shift", &journal);
        shifting.beat_shift = 10.;
        registry.register(shifting).unwrap();
        registry.initialize(&ParserConfig::default()).unwrap();

        assert!(
            registry
                .process_beats(vec![candidate(0.5)], 1., &ParserConfig::default())
                .is_err()
        );
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(JournalPlugin::new("once", &journal)).unwrap();
        registry.initialize(&ParserConfig::default()).unwrap();
        registry.cleanup();
        registry.cleanup();
        let cleanups = journal
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with("cleanup"))
            .count();
        assert_eq!(cleanups, 1);
    }

    #[test]
    fn test_remove_unknown_plugin_fails() {
        let mut registry = PluginRegistry::new();
        assert!(registry.remove("ghost").is_err());
    }
}
