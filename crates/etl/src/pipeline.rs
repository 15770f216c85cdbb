use crate::error::Result;
use crate::extract::{Extract, Extraction};
use crate::load::Load;
use crate::transform::Transform;
use futures::StreamExt;
use ketl_model::ExpectedFile;
use tracing::{debug, info, instrument};

/// Handle of an extractor added to a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtractorId(usize);

/// Handle of a transformer added to a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformerId(usize);

/// Handle of a loader added to a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(usize);

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ExtractorId {}
    impl Sealed for super::TransformerId {}
}

/// A pipeline edge.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Transform(ExtractorId, TransformerId),
    Load(TransformerId, LoaderId),
}

/// Stages that may feed `To`. Only extractor → transformer and
/// transformer → loader exist.
pub trait Link<To>: sealed::Sealed + Copy {
    #[doc(hidden)]
    fn edge(self, to: To) -> Edge;
}

impl Link<TransformerId> for ExtractorId {
    fn edge(self, to: TransformerId) -> Edge {
        Edge::Transform(self, to)
    }
}

impl Link<LoaderId> for TransformerId {
    fn edge(self, to: LoaderId) -> Edge {
        Edge::Load(self, to)
    }
}

/// What a [`Pipeline::execute`] run did.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// One per extractor, in the order they were added.
    pub extractions: Vec<Extraction>,
    /// One per transformer, in the order they were added.
    pub transforms: Vec<TransformReport>,
}

impl PipelineReport {
    /// Number of cached files, across all extractors, that failed.
    pub fn failures(&self) -> usize {
        self.extractions.iter().map(|e| e.failures.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub transformer: String,
    pub batches: usize,
    pub rows: usize,
}

/// Extractors, transformers and loaders wired together.
///
/// Every extractor runs first. Each transformer then receives the expected
/// files of all extractors feeding it, and every batch it yields is handed to
/// each loader it feeds. Loaders are finalized once all transformers are done.
///
/// ```ignore
/// let mut pipeline = Pipeline::new();
/// let e = pipeline.add_extractor(extractor);
/// let t = pipeline.add_transformer(DelimitedTransformer::default());
/// let l = pipeline.add_loader(DelimitedFileLoader::new("out.csv")?);
/// pipeline.connect(e, t).connect(t, l);
/// let report = pipeline.execute().await?;
/// ```
#[derive(Default)]
pub struct Pipeline {
    extractors: Vec<Box<dyn Extract>>,
    transformers: Vec<Box<dyn Transform>>,
    loaders: Vec<Box<dyn Load>>,
    edges: Vec<Edge>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extractor(&mut self, extractor: impl Extract + 'static) -> ExtractorId {
        self.extractors.push(Box::new(extractor));
        ExtractorId(self.extractors.len() - 1)
    }

    pub fn add_transformer(&mut self, transformer: impl Transform + 'static) -> TransformerId {
        self.transformers.push(Box::new(transformer));
        TransformerId(self.transformers.len() - 1)
    }

    pub fn add_loader(&mut self, loader: impl Load + 'static) -> LoaderId {
        self.loaders.push(Box::new(loader));
        LoaderId(self.loaders.len() - 1)
    }

    /// Add an edge. Connecting the same pair twice has no further effect.
    pub fn connect<From, To>(&mut self, from: From, to: To) -> &mut Self
    where
        From: Link<To>,
    {
        let edge = from.edge(to);
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        self
    }

    /// Connect every extractor to every transformer and every transformer to
    /// every loader.
    pub fn fully_connected(
        extractors: Vec<Box<dyn Extract>>,
        transformers: Vec<Box<dyn Transform>>,
        loaders: Vec<Box<dyn Load>>,
    ) -> Self {
        let mut edges = Vec::new();
        for t in 0..transformers.len() {
            edges.extend((0..extractors.len()).map(|e| Edge::Transform(ExtractorId(e), TransformerId(t))));
            edges.extend((0..loaders.len()).map(|l| Edge::Load(TransformerId(t), LoaderId(l))));
        }
        Self { extractors, transformers, loaders, edges }
    }

    fn upstream(&self, transformer: TransformerId) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().filter_map(move |edge| match edge {
            Edge::Transform(ExtractorId(e), t) if *t == transformer => Some(*e),
            _ => None,
        })
    }

    fn downstream(&self, transformer: TransformerId) -> Vec<usize> {
        self.edges
            .iter()
            .filter_map(|edge| match edge {
                Edge::Load(t, LoaderId(l)) if *t == transformer => Some(*l),
                _ => None,
            })
            .collect()
    }

    /// Run every stage once.
    ///
    /// Per-file extraction failures end up in the report. Any other error
    /// aborts the run; batches already loaded stay where they are and
    /// loaders are not finalized.
    #[instrument(skip_all, fields(
        extractors = self.extractors.len(),
        transformers = self.transformers.len(),
        loaders = self.loaders.len()
    ))]
    pub async fn execute(&mut self) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        for extractor in &self.extractors {
            debug!(extractor = extractor.name(), "extracting");
            report.extractions.push(extractor.extract().await?);
        }

        for (index, transformer) in self.transformers.iter().enumerate() {
            let id = TransformerId(index);
            let mut upstream = self.upstream(id).collect::<Vec<_>>();
            upstream.sort_unstable();
            let files: Vec<ExpectedFile> =
                upstream.into_iter().flat_map(|e| report.extractions[e].files.iter().cloned()).collect();
            let targets = self.downstream(id);
            debug!(transformer = transformer.name(), files = files.len(), loaders = targets.len(), "transforming");

            let mut summary = TransformReport { transformer: transformer.name().to_string(), batches: 0, rows: 0 };
            let mut batches = transformer.transform(&files);
            while let Some(batch) = batches.next().await {
                let batch = batch?;
                summary.batches += 1;
                summary.rows += batch.len();
                for &target in &targets {
                    self.loaders[target].load(&batch).await?;
                }
            }
            info!(transformer = %summary.transformer, batches = summary.batches, rows = summary.rows, "transformed");
            report.transforms.push(summary);
        }

        for loader in &mut self.loaders {
            loader.finalize().await?;
            debug!(destination = loader.destination(), "loader finalized");
        }
        Ok(report)
    }
}
