//! Cloudlets, the units of computational work executed inside VMs.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use dslab_core::Id;

/// Status of cloudlet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Created,
    Queued,
    InExec,
    Paused,
    Success,
    Canceled,
    Failed,
}

impl CloudletStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            CloudletStatus::Success | CloudletStatus::Canceled | CloudletStatus::Failed
        )
    }
}

impl Display for CloudletStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CloudletStatus::Created => write!(f, "created"),
            CloudletStatus::Queued => write!(f, "queued"),
            CloudletStatus::InExec => write!(f, "in_exec"),
            CloudletStatus::Paused => write!(f, "paused"),
            CloudletStatus::Success => write!(f, "success"),
            CloudletStatus::Canceled => write!(f, "canceled"),
            CloudletStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Represents cloudlet, a task of specified length (in millions of instructions) running on some VM PEs.
#[derive(Clone, Debug, Serialize)]
pub struct Cloudlet {
    pub id: u64,
    pub vm_id: u32,
    pub length: u64,
    pub pes: u32,
    /// Component which receives the cloudlet back once it is finished or canceled.
    pub broker: Option<Id>,
    pub status: CloudletStatus,
    pub submission_time: f64,
    pub exec_start_time: f64,
    pub finish_time: f64,
    pub finished_length: f64,
}

impl Cloudlet {
    pub fn new(id: u64, vm_id: u32, length: u64, pes: u32) -> Self {
        Self {
            id,
            vm_id,
            length,
            pes: pes.max(1),
            broker: None,
            status: CloudletStatus::Created,
            submission_time: -1.,
            exec_start_time: -1.,
            finish_time: -1.,
            finished_length: 0.,
        }
    }

    pub fn remaining_length(&self) -> f64 {
        (self.length as f64 - self.finished_length).max(0.)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_final()
    }

    /// Execution time from the start of execution to finish, if the cloudlet has finished.
    pub fn actual_exec_time(&self) -> Option<f64> {
        if self.status == CloudletStatus::Success && self.exec_start_time >= 0. {
            Some(self.finish_time - self.exec_start_time)
        } else {
            None
        }
    }
}
