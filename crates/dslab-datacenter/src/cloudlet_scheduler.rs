//! Scheduling of cloudlets inside a VM.

use dyn_clone::{clone_trait_object, DynClone};

use crate::cloudlet::{Cloudlet, CloudletStatus};

const LENGTH_EPSILON: f64 = 1e-6;

/// Trait for implementation of cloudlet schedulers which share VM MIPS between its cloudlets.
///
/// All methods taking `time` first bring the progress of running cloudlets up to this time
/// using the MIPS share received in the previous update.
pub trait CloudletScheduler: DynClone {
    /// Accepts a new cloudlet, returns the delay until the next cloudlet completion.
    fn submit(&mut self, cloudlet: Cloudlet, time: f64) -> f64;

    /// Updates cloudlet progress and sets the new MIPS share (one value per VM PE).
    ///
    /// Returns the delay until the next cloudlet completion or `f64::INFINITY` if nothing is running.
    fn update_processing(&mut self, time: f64, mips_share: &[u64]) -> f64;

    /// Removes cloudlet from execution, returns it with `Canceled` status.
    fn cancel(&mut self, cloudlet_id: u64, time: f64) -> Option<Cloudlet>;

    /// Suspends cloudlet execution. Returns `false` if the cloudlet is not running or waiting.
    fn pause(&mut self, cloudlet_id: u64, time: f64) -> bool;

    /// Resumes paused cloudlet, returns the delay until the next cloudlet completion.
    fn resume(&mut self, cloudlet_id: u64, time: f64) -> Option<f64>;

    /// Returns cloudlets finished since the previous call.
    fn take_finished(&mut self) -> Vec<Cloudlet>;

    /// Removes all unfinished cloudlets and returns them with the specified final status.
    fn take_unfinished(&mut self, status: CloudletStatus, time: f64) -> Vec<Cloudlet>;

    /// Returns the number of running, waiting and paused cloudlets.
    fn unfinished_count(&self) -> usize;

    /// Returns the number of cloudlets which currently receive MIPS.
    fn running_count(&self) -> usize;
}

clone_trait_object!(CloudletScheduler);

/// Way of sharing VM PEs between cloudlets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudletSharing {
    /// All cloudlets run at once, PEs are shared proportionally to the number of PEs requested by each cloudlet.
    TimeShared,
    /// Each running cloudlet occupies its PEs exclusively, others wait in a FIFO queue.
    SpaceShared,
}

/// Cloudlet scheduler implementing both [`CloudletSharing`] policies.
#[derive(Clone)]
pub struct CloudletSchedulerSimple {
    sharing: CloudletSharing,
    exec: Vec<Cloudlet>,
    waiting: Vec<Cloudlet>,
    paused: Vec<Cloudlet>,
    finished: Vec<Cloudlet>,
    mips_share: Vec<u64>,
    last_update: f64,
}

impl CloudletSchedulerSimple {
    pub fn new(sharing: CloudletSharing) -> Self {
        Self {
            sharing,
            exec: Vec::new(),
            waiting: Vec::new(),
            paused: Vec::new(),
            finished: Vec::new(),
            mips_share: Vec::new(),
            last_update: 0.,
        }
    }

    pub fn time_shared() -> Self {
        Self::new(CloudletSharing::TimeShared)
    }

    pub fn space_shared() -> Self {
        Self::new(CloudletSharing::SpaceShared)
    }

    pub fn sharing(&self) -> CloudletSharing {
        self.sharing
    }

    fn capacity_per_pe(&self) -> f64 {
        if self.mips_share.is_empty() {
            return 0.;
        }
        self.mips_share.iter().sum::<u64>() as f64 / self.mips_share.len() as f64
    }

    /// Execution rates (MIPS) of running cloudlets, aligned with `exec`.
    fn rates(&self) -> Vec<f64> {
        let pe_count = self.mips_share.len() as f64;
        let capacity = self.capacity_per_pe();
        match self.sharing {
            CloudletSharing::TimeShared => {
                let requested_pes: u32 = self.exec.iter().map(|c| c.pes).sum();
                let scale = if requested_pes as f64 > pe_count {
                    pe_count / requested_pes as f64
                } else {
                    1.
                };
                self.exec
                    .iter()
                    .map(|c| (c.pes as f64).min(pe_count) * capacity * scale)
                    .collect()
            }
            CloudletSharing::SpaceShared => self
                .exec
                .iter()
                .map(|c| (c.pes as f64).min(pe_count) * capacity)
                .collect(),
        }
    }

    fn advance(&mut self, time: f64) {
        let elapsed = time - self.last_update;
        if elapsed > 0. {
            let rates = self.rates();
            let start = self.last_update;
            for (cloudlet, rate) in self.exec.iter_mut().zip(rates) {
                if rate <= 0. {
                    continue;
                }
                let remaining = cloudlet.remaining_length();
                if remaining / rate <= elapsed {
                    cloudlet.finished_length = cloudlet.length as f64;
                    cloudlet.finish_time = start + remaining / rate;
                } else {
                    cloudlet.finished_length += rate * elapsed;
                }
            }
        }
        self.last_update = self.last_update.max(time);

        let mut i = 0;
        while i < self.exec.len() {
            if self.exec[i].remaining_length() <= LENGTH_EPSILON {
                let mut cloudlet = self.exec.remove(i);
                cloudlet.status = CloudletStatus::Success;
                if cloudlet.finish_time < 0. {
                    cloudlet.finish_time = time;
                }
                self.finished.push(cloudlet);
            } else {
                i += 1;
            }
        }
        self.start_waiting(time);
    }

    fn used_pes(&self) -> u32 {
        self.exec.iter().map(|c| c.pes).sum()
    }

    fn start_waiting(&mut self, time: f64) {
        while !self.waiting.is_empty() {
            let fits = match self.sharing {
                CloudletSharing::TimeShared => true,
                CloudletSharing::SpaceShared => {
                    !self.mips_share.is_empty()
                        && (self.exec.is_empty()
                            || self.used_pes() + self.waiting[0].pes <= self.mips_share.len() as u32)
                }
            };
            if !fits {
                break;
            }
            let mut cloudlet = self.waiting.remove(0);
            cloudlet.status = CloudletStatus::InExec;
            if cloudlet.exec_start_time < 0. {
                cloudlet.exec_start_time = time;
            }
            self.exec.push(cloudlet);
        }
    }

    fn next_completion_delay(&self) -> f64 {
        self.exec
            .iter()
            .zip(self.rates())
            .filter(|(_, rate)| *rate > 0.)
            .map(|(c, rate)| c.remaining_length() / rate)
            .fold(f64::INFINITY, f64::min)
    }

    fn remove_unfinished(&mut self, cloudlet_id: u64) -> Option<Cloudlet> {
        for list in [&mut self.exec, &mut self.waiting, &mut self.paused] {
            if let Some(pos) = list.iter().position(|c| c.id == cloudlet_id) {
                return Some(list.remove(pos));
            }
        }
        None
    }
}

impl CloudletScheduler for CloudletSchedulerSimple {
    fn submit(&mut self, mut cloudlet: Cloudlet, time: f64) -> f64 {
        self.advance(time);
        cloudlet.status = CloudletStatus::Queued;
        cloudlet.submission_time = time;
        self.waiting.push(cloudlet);
        self.start_waiting(time);
        self.next_completion_delay()
    }

    fn update_processing(&mut self, time: f64, mips_share: &[u64]) -> f64 {
        self.advance(time);
        self.mips_share = mips_share.to_vec();
        self.start_waiting(time);
        self.next_completion_delay()
    }

    fn cancel(&mut self, cloudlet_id: u64, time: f64) -> Option<Cloudlet> {
        self.advance(time);
        let mut cloudlet = self.remove_unfinished(cloudlet_id)?;
        cloudlet.status = CloudletStatus::Canceled;
        cloudlet.finish_time = time;
        self.start_waiting(time);
        Some(cloudlet)
    }

    fn pause(&mut self, cloudlet_id: u64, time: f64) -> bool {
        self.advance(time);
        let in_progress = self.exec.iter().chain(self.waiting.iter()).any(|c| c.id == cloudlet_id);
        if !in_progress {
            return false;
        }
        if let Some(mut cloudlet) = self.remove_unfinished(cloudlet_id) {
            cloudlet.status = CloudletStatus::Paused;
            self.paused.push(cloudlet);
        }
        self.start_waiting(time);
        true
    }

    fn resume(&mut self, cloudlet_id: u64, time: f64) -> Option<f64> {
        self.advance(time);
        let pos = self.paused.iter().position(|c| c.id == cloudlet_id)?;
        let mut cloudlet = self.paused.remove(pos);
        cloudlet.status = CloudletStatus::Queued;
        self.waiting.push(cloudlet);
        self.start_waiting(time);
        Some(self.next_completion_delay())
    }

    fn take_finished(&mut self) -> Vec<Cloudlet> {
        std::mem::take(&mut self.finished)
    }

    fn take_unfinished(&mut self, status: CloudletStatus, time: f64) -> Vec<Cloudlet> {
        self.advance(time);
        let mut result = Vec::new();
        for list in [&mut self.exec, &mut self.waiting, &mut self.paused] {
            for mut cloudlet in list.drain(..) {
                cloudlet.status = status;
                cloudlet.finish_time = time;
                result.push(cloudlet);
            }
        }
        result
    }

    fn unfinished_count(&self) -> usize {
        self.exec.len() + self.waiting.len() + self.paused.len()
    }

    fn running_count(&self) -> usize {
        self.exec.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_shared_two_cloudlets() {
        let mut scheduler = CloudletSchedulerSimple::time_shared();
        scheduler.update_processing(0., &[1000]);
        scheduler.submit(Cloudlet::new(0, 0, 10000, 1), 0.);
        let delay = scheduler.submit(Cloudlet::new(1, 0, 20000, 1), 0.);
        // each cloudlet gets 500 MIPS
        assert_eq!(delay, 20.);
        let delay = scheduler.update_processing(20., &[1000]);
        let finished = scheduler.take_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, 0);
        assert_eq!(finished[0].finish_time, 20.);
        // the second one has 10000 MI left and now runs at full speed
        assert_eq!(delay, 10.);
    }

    #[test]
    fn test_space_shared_queues_cloudlets() {
        let mut scheduler = CloudletSchedulerSimple::space_shared();
        scheduler.update_processing(0., &[1000]);
        scheduler.submit(Cloudlet::new(0, 0, 5000, 1), 0.);
        scheduler.submit(Cloudlet::new(1, 0, 5000, 1), 0.);
        assert_eq!(scheduler.running_count(), 1);
        let delay = scheduler.update_processing(5., &[1000]);
        assert_eq!(scheduler.take_finished().len(), 1);
        assert_eq!(scheduler.running_count(), 1);
        assert_eq!(delay, 5.);
    }

    #[test]
    fn test_pause_resume_cancel() {
        let mut scheduler = CloudletSchedulerSimple::time_shared();
        scheduler.update_processing(0., &[1000]);
        scheduler.submit(Cloudlet::new(0, 0, 10000, 1), 0.);
        assert!(scheduler.pause(0, 4.));
        assert!(!scheduler.pause(0, 4.));
        assert_eq!(scheduler.update_processing(10., &[1000]), f64::INFINITY);
        assert_eq!(scheduler.resume(0, 10.), Some(6.));
        let cloudlet = scheduler.cancel(0, 12.).unwrap();
        assert_eq!(cloudlet.status, CloudletStatus::Canceled);
        assert_eq!(cloudlet.finished_length, 6000.);
        assert_eq!(cloudlet.finish_time, 12.);
        assert_eq!(scheduler.unfinished_count(), 0);
        assert!(scheduler.cancel(0, 12.).is_none());
    }
}
