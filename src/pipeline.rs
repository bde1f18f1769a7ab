//! Ordered preprocessing pipeline.
//!
//! Stages are sorted once, when the pipeline is built, by
//! `(order, name, registration position)`. Running the pipeline feeds each
//! stage the previous stage's output.

use crate::cancellation::Cancellation;
use crate::error::{MigrationError, is_cancellation};
use crate::script::Script;
use crate::script_traits::ScriptPreprocessor;

/// Preprocessor stages in execution order.
pub struct PreprocessorPipeline {
    stages: Vec<Box<dyn ScriptPreprocessor>>,
}

impl PreprocessorPipeline {
    /// Build a pipeline from stages in registration order.
    pub fn new(mut stages: Vec<Box<dyn ScriptPreprocessor>>) -> Self {
        // Stable sort keeps registration order for identical (order, name) pairs
        stages.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.name().as_bytes().cmp(b.name().as_bytes()))
        });
        Self { stages }
    }

    /// Pipeline with no stages; scripts pass through unchanged
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in the order they run
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run `script` through every stage.
    ///
    /// The error names the planned script and the stage that failed. A stage
    /// that stops on cancellation yields `MigrationError::Cancelled`.
    pub fn process(
        &self,
        script: &Script,
        cancellation: &Cancellation,
    ) -> Result<Script, MigrationError> {
        let mut current = script.clone();
        for stage in &self.stages {
            current = stage.process(current, cancellation).map_err(|source| {
                if is_cancellation(&source) {
                    MigrationError::Cancelled
                } else {
                    MigrationError::Preprocessing {
                        script: script.name().to_string(),
                        stage: stage.name().to_string(),
                        source,
                    }
                }
            })?;
            tracing::trace!(script = script.name(), stage = stage.name(), "Applied preprocessor");
        }
        Ok(current)
    }
}

impl Default for PreprocessorPipeline {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for PreprocessorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessorPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Cancelled;
    use anyhow::{Result, bail};

    /// Appends its tag to the content
    struct Tag {
        order: i32,
        name: &'static str,
        tag: &'static str,
    }

    impl ScriptPreprocessor for Tag {
        fn order(&self) -> i32 {
            self.order
        }

        fn name(&self) -> &str {
            self.name
        }

        fn process(&self, script: Script, _cancellation: &Cancellation) -> Result<Script> {
            let content = format!("{}{}", script.content(), self.tag);
            Ok(script.with_content(content))
        }
    }

    fn tag(order: i32, name: &'static str, tag: &'static str) -> Box<dyn ScriptPreprocessor> {
        Box::new(Tag { order, name, tag })
    }

    struct Failing;

    impl ScriptPreprocessor for Failing {
        fn order(&self) -> i32 {
            50
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn process(&self, _script: Script, _cancellation: &Cancellation) -> Result<Script> {
            bail!("unsupported directive")
        }
    }

    struct Renaming;

    impl ScriptPreprocessor for Renaming {
        fn order(&self) -> i32 {
            0
        }

        fn name(&self) -> &str {
            "renaming"
        }

        fn process(&self, script: Script, cancellation: &Cancellation) -> Result<Script> {
            cancellation.check()?;
            let name = format!("{}.sh", script.name());
            Ok(script.with_name(name))
        }
    }

    #[test]
    fn test_stages_run_in_ascending_order() {
        let pipeline = PreprocessorPipeline::new(vec![
            tag(100, "c", "C"),
            tag(-5, "a", "A"),
            tag(0, "b", "B"),
        ]);
        let out = pipeline
            .process(&Script::new("s", ""), &Cancellation::new())
            .expect("pipeline should succeed");
        assert_eq!(out.content(), "ABC");
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_broken_by_name_then_registration() {
        let pipeline = PreprocessorPipeline::new(vec![
            tag(10, "zeta", "Z"),
            tag(10, "alpha", "1"),
            tag(10, "alpha", "2"),
        ]);
        let out = pipeline
            .process(&Script::new("s", ""), &Cancellation::new())
            .expect("pipeline should succeed");
        assert_eq!(out.content(), "12Z");
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = PreprocessorPipeline::empty();
        let script = Script::new("001", "echo hi");
        let out = pipeline
            .process(&script, &Cancellation::new())
            .expect("pipeline should succeed");
        assert_eq!(out, script);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_stage_may_rename() {
        let pipeline = PreprocessorPipeline::new(vec![Box::new(Renaming)]);
        let out = pipeline
            .process(&Script::new("001-init", "true"), &Cancellation::new())
            .expect("pipeline should succeed");
        assert_eq!(out.name(), "001-init.sh");
    }

    #[test]
    fn test_failure_names_script_and_stage() {
        let pipeline = PreprocessorPipeline::new(vec![tag(0, "ok", "x"), Box::new(Failing)]);
        let err = pipeline
            .process(&Script::new("002-add", ""), &Cancellation::new())
            .unwrap_err();

        match err {
            MigrationError::Preprocessing { script, stage, .. } => {
                assert_eq!(script, "002-add");
                assert_eq!(stage, "failing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_stage_maps_to_cancelled() {
        let pipeline = PreprocessorPipeline::new(vec![Box::new(Renaming)]);
        let token = Cancellation::new();
        token.cancel();

        let err = pipeline.process(&Script::new("001", ""), &token).unwrap_err();
        assert!(err.is_cancelled());
        // Marker type still usable directly
        assert_eq!(token.check(), Err(Cancelled));
    }
}
