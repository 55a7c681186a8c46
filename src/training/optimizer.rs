use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{
    AdaGradConfig, AdamConfig, AdamWConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig,
};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// Registered optimizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    AdamW,
    RmsProp,
    AdaGrad,
    /// Adam with epsilon 1e-7, built for the run's device
    Adam16,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 6] = [
        OptimizerKind::Sgd,
        OptimizerKind::Adam,
        OptimizerKind::AdamW,
        OptimizerKind::RmsProp,
        OptimizerKind::AdaGrad,
        OptimizerKind::Adam16,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::Adam => "Adam",
            OptimizerKind::AdamW => "AdamW",
            OptimizerKind::RmsProp => "RMSprop",
            OptimizerKind::AdaGrad => "Adagrad",
            OptimizerKind::Adam16 => "Adam16",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        OptimizerKind::ALL
            .into_iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarnessError::UnknownOptimizerKind(s.to_string()))
    }
}

impl TryFrom<String> for OptimizerKind {
    type Error = HarnessError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<OptimizerKind> for String {
    fn from(kind: OptimizerKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Optimizer selection and its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 1e-4,
            weight_decay: 0.1,
        }
    }
}

/// Work to run against whichever concrete optimizer the registry builds
pub trait OptimizerJob<B: AutodiffBackend, M: AutodiffModule<B>> {
    type Output;

    fn run<O: Optimizer<M, B>>(self, optimizer: ParamOptimizer<B, M, O>) -> Self::Output;
}

impl OptimizerSettings {
    fn decay(&self) -> Option<WeightDecayConfig> {
        (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay as f32))
    }

    /// Construct the optimizer for models of type `M` and hand it to `job`
    pub fn build<B, M, J>(&self, device: &B::Device, job: J) -> J::Output
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        J: OptimizerJob<B, M>,
    {
        info!(
            "Optimizer: {} (lr={:.1e}, weight_decay={})",
            self.kind, self.learning_rate, self.weight_decay
        );
        let lr = self.learning_rate;
        match self.kind {
            OptimizerKind::Sgd => {
                let momentum = MomentumConfig::new().with_momentum(0.6).with_dampening(0.0);
                let optim = SgdConfig::new()
                    .with_momentum(Some(momentum))
                    .with_weight_decay(self.decay())
                    .init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
            OptimizerKind::Adam => {
                let optim = AdamConfig::new().with_weight_decay(self.decay()).init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
            OptimizerKind::AdamW => {
                let optim = AdamWConfig::new()
                    .with_weight_decay(self.weight_decay as f32)
                    .init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
            OptimizerKind::RmsProp => {
                let optim = RmsPropConfig::new().with_weight_decay(self.decay()).init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
            OptimizerKind::AdaGrad => {
                let optim = AdaGradConfig::new().with_weight_decay(self.decay()).init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
            OptimizerKind::Adam16 => {
                debug!("Adam16 state lives on {:?}", device);
                let optim = AdamConfig::new()
                    .with_epsilon(1e-7)
                    .with_weight_decay(self.decay())
                    .init::<B, M>();
                job.run(ParamOptimizer::new(self.kind, optim, lr))
            }
        }
    }
}

/// A burn optimizer plus its learning rate and the gradients of the last
/// backward pass, waiting for `step`
pub struct ParamOptimizer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    kind: OptimizerKind,
    inner: O,
    lr: f64,
    pending: Option<GradientsParams>,
    _marker: PhantomData<(B, M)>,
}

impl<B, M, O> ParamOptimizer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(kind: OptimizerKind, inner: O, lr: f64) -> Self {
        Self {
            kind,
            inner,
            lr,
            pending: None,
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Drop gradients left from a previous backward pass
    pub fn zero_grad(&mut self) {
        self.pending = None;
    }

    /// Backpropagate `loss` and keep the gradients of `model`'s parameters
    pub fn backward(&mut self, loss: Tensor<B, 1>, model: &M) {
        self.pending = Some(GradientsParams::from_grads(loss.backward(), model));
    }

    pub fn has_gradients(&self) -> bool {
        self.pending.is_some()
    }

    /// Rescale pending gradients so their global L2 norm is at most
    /// `max_norm`; returns the norm before clipping
    pub fn clip_grad_norm(&mut self, model: &M, max_norm: f64) -> f64 {
        let Some(grads) = self.pending.as_mut() else {
            return 0.0;
        };

        let mut norm = GradNorm::<B> {
            grads,
            sum_sq: 0.0,
            _backend: PhantomData,
        };
        model.visit(&mut norm);
        let total = norm.sum_sq.sqrt();

        let coef = max_norm / (total + 1e-6);
        if coef < 1.0 {
            let mut scale = GradScale::<B> {
                grads,
                coef,
                _backend: PhantomData,
            };
            model.visit(&mut scale);
        }
        total
    }

    /// Apply pending gradients at the current learning rate
    pub fn step(&mut self, model: M) -> M {
        match self.pending.take() {
            Some(grads) => self.inner.step(self.lr, model, grads),
            None => model,
        }
    }

    pub fn to_record(&self) -> O::Record {
        self.inner.to_record()
    }

    pub fn load_record(self, record: O::Record) -> Self {
        Self {
            inner: self.inner.load_record(record),
            ..self
        }
    }
}

struct GradNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum_sq: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sum_sq += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct GradScale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    coef: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.coef));
        }
    }
}
