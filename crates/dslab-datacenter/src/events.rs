//! Datacenter events.

// VM EVENTS ///////////////////////////////////////////////////////////////////////////////////////

pub mod vm {
    use serde::Serialize;

    use crate::suitability::Suitability;

    #[derive(Serialize)]
    pub struct VmCreateRequest {
        pub vm_id: u32,
        pub ack: bool,
    }

    #[derive(Serialize, Clone)]
    pub struct VmCreateAck {
        pub vm_id: u32,
        pub host_id: Option<u32>,
        pub suitability: Suitability,
    }

    #[derive(Serialize)]
    pub struct VmDestroyRequest {
        pub vm_id: u32,
        pub ack: bool,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDestroyAck {
        pub vm_id: u32,
    }

    #[derive(Serialize)]
    pub struct VmFailed {
        pub vm_id: u32,
        pub host_id: u32,
    }
}

// MIGRATION EVENTS ////////////////////////////////////////////////////////////////////////////////

pub mod migration {
    use serde::Serialize;

    /// Asks datacenter to migrate VM, the target is selected by the allocation policy if not specified.
    #[derive(Serialize)]
    pub struct VmMigrationRequest {
        pub vm_id: u32,
        pub target_host: Option<u32>,
    }

    #[derive(Serialize)]
    pub struct VmMigrationFinish {
        pub vm_id: u32,
        pub target_host: u32,
        pub ack: bool,
    }

    #[derive(Serialize, Clone)]
    pub struct VmMigrationAck {
        pub vm_id: u32,
        pub source_host: Option<u32>,
        pub target_host: u32,
        pub success: bool,
    }
}

// HOST EVENTS /////////////////////////////////////////////////////////////////////////////////////

pub mod host {
    use serde::Serialize;

    use crate::config::HostSpec;

    #[derive(Serialize)]
    pub struct HostAddRequest {
        pub spec: HostSpec,
        pub host_id: Option<u32>,
    }

    #[derive(Serialize)]
    pub struct HostRemoveRequest {
        pub host_id: u32,
    }

    #[derive(Serialize)]
    pub struct HostPowerOn {
        pub host_id: u32,
    }

    #[derive(Serialize)]
    pub struct HostPowerOff {
        pub host_id: u32,
    }

    #[derive(Serialize)]
    pub struct HostPowerTransition {
        pub host_id: u32,
        pub activate: bool,
    }
}

// CLOUDLET EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod cloudlet {
    use serde::Serialize;

    use crate::cloudlet::Cloudlet;

    #[derive(Serialize)]
    pub struct CloudletSubmit {
        pub cloudlet: Cloudlet,
        pub ack: bool,
    }

    #[derive(Serialize)]
    pub struct CloudletSubmitAck {
        pub cloudlet_id: u64,
        pub vm_id: u32,
        pub accepted: bool,
    }

    #[derive(Serialize)]
    pub struct CloudletCancel {
        pub cloudlet_id: u64,
    }

    #[derive(Serialize)]
    pub struct CloudletPause {
        pub cloudlet_id: u64,
    }

    #[derive(Serialize)]
    pub struct CloudletResume {
        pub cloudlet_id: u64,
    }

    /// Finished, canceled or failed cloudlet sent back to its broker.
    #[derive(Serialize)]
    pub struct CloudletReturn {
        pub cloudlet: Cloudlet,
    }
}

// PROCESSING EVENTS ///////////////////////////////////////////////////////////////////////////////

pub mod processing {
    use serde::Serialize;

    #[derive(Serialize)]
    pub struct UpdateProcessing {}
}
