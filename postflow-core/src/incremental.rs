//! Incremental evaluation of workflows over large scopings.
//!
//! A workflow with a designated chunkable input (a scoping) and a mergeable
//! output can be evaluated piecewise: the scoping splits into contiguous
//! chunks, the workflow runs once per chunk, and an engine-side merger folds
//! the partial outputs into a running aggregate. The merged result is
//! required to match the monolithic run; no chunk state survives its merge.

use crate::entity::collection::FieldsContainer;
use crate::entity::Entity;
use crate::entity::scoping::Scoping;
use crate::error::{Error, Result};
use crate::operator::Operator;
use crate::workflow::Workflow;
use crate::Id;

/// Engine operator folding fields containers into a running aggregate.
pub const MERGE_FIELDS_CONTAINERS: &str = "incremental::merge::fields_container";

type ProgressFn = Box<dyn Fn(usize, usize) + Send>;

/// Chunked evaluation driver for one workflow.
pub struct IncrementalRunner {
    workflow: Workflow,
    input_name: String,
    output_name: String,
    merge_operator: String,
    chunk_len: usize,
    progress: Option<ProgressFn>,
}

impl IncrementalRunner {
    /// Prepares chunked evaluation of `workflow`, feeding chunk scopings to
    /// the exposed input `input_name` and collecting the exposed output
    /// `output_name`.
    pub fn new(
        workflow: Workflow,
        input_name: &str,
        output_name: &str,
        chunk_len: usize,
    ) -> Result<Self> {
        if chunk_len == 0 {
            return Err(Error::validation("chunk length must be positive"));
        }
        Ok(Self {
            workflow,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            merge_operator: MERGE_FIELDS_CONTAINERS.to_string(),
            chunk_len,
            progress: None,
        })
    }

    /// Overrides the merger, e.g. for aggregates with dedicated folding
    /// operators.
    pub fn with_merge_operator(mut self, name: &str) -> Self {
        self.merge_operator = name.to_string();
        self
    }

    /// Progress callback invoked after each merged chunk with
    /// `(chunks done, chunks total)`.
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Merged output of a full chunked run, for mergers whose first output
    /// pin is a fields container.
    pub fn run_merged(&self, scoping: &Scoping) -> Result<FieldsContainer> {
        self.run(scoping)?.get_output(0)
    }

    /// Runs the workflow once per chunk of `scoping`, folding each partial
    /// output into the merger, and returns the folded merger for typed
    /// output retrieval.
    ///
    /// Each partial output is dropped before the next chunk starts, so the
    /// client-side footprint stays one chunk deep.
    pub fn run(&self, scoping: &Scoping) -> Result<Operator> {
        let ids = scoping.ids()?;
        if ids.is_empty() {
            return Err(Error::validation(
                "cannot run incrementally over an empty scoping",
            ));
        }
        let location = scoping.location()?;
        let server = self.workflow.handle().server().clone();
        let chunks: Vec<&[Id]> = ids.chunks(self.chunk_len).collect();
        let total = chunks.len();
        debug!(
            "incremental run: {} ids in {} chunks of at most {}",
            ids.len(),
            total,
            self.chunk_len
        );

        let merger = Operator::new(&server, &self.merge_operator)?;
        for (done, chunk) in chunks.into_iter().enumerate() {
            let chunk_scoping = Scoping::new(&server, location.clone())?;
            chunk_scoping.set_ids(chunk.to_vec())?;

            let head = self.workflow.create_on_other_server(&server)?;
            head.connect(&self.input_name, &chunk_scoping)?;
            let partial: FieldsContainer = head.get_output(&self.output_name)?;

            merger.connect(0, &partial)?;
            merger.run()?;
            if let Some(progress) = &self.progress {
                progress(done + 1, total);
            }
        }
        Ok(merger)
    }
}
