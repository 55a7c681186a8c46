use crate::training::LrSchedule;

/// Multi-step decay: multiply the learning rate by `gamma` each time the
/// epoch counter lands on a milestone
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepLr {
    milestones: Vec<usize>,
    gamma: f64,
    /// Last epoch stepped into (1-based), 0 before the first step
    last_epoch: usize,
}

impl MultiStepLr {
    /// Create scheduler from explicit milestones
    pub fn new(mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        milestones.dedup();
        Self {
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Milestones every `step_every` epochs strictly below `max_epochs`
    pub fn every(step_every: usize, gamma: f64, max_epochs: usize) -> Self {
        let step_every = step_every.max(1);
        let milestones = (1..max_epochs).filter(|x| x % step_every == 0).collect();
        Self::new(milestones, gamma)
    }

    pub fn from_schedule(schedule: &LrSchedule, max_epochs: usize) -> Self {
        Self::every(schedule.step_every, schedule.gamma, max_epochs)
    }

    pub fn milestones(&self) -> &[usize] {
        &self.milestones
    }

    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }

    /// Advance one epoch and return the learning rate to use from now on
    pub fn step(&mut self, current_lr: f64) -> f64 {
        self.last_epoch += 1;
        if self.milestones.binary_search(&self.last_epoch).is_ok() {
            current_lr * self.gamma
        } else {
            current_lr
        }
    }

    /// Skip ahead to `epochs` completed steps without touching the rate;
    /// used on resume, where the rate comes back with the checkpoint
    pub fn fast_forward(&mut self, epochs: usize) {
        self.last_epoch = epochs;
    }

    /// Rate in effect during 1-based `epoch` when starting from `base_lr`
    pub fn lr_at(&self, base_lr: f64, epoch: usize) -> f64 {
        let decays = self.milestones.iter().filter(|&&m| m <= epoch).count();
        base_lr * self.gamma.powi(decays as i32)
    }
}
