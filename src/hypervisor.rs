use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Hypervisor families known to the management server.
///
/// Stored in the database by canonical name (`XenServer`, `KVM`, ...). Parsing
/// is case-insensitive and anything unrecognised maps to `None`.
#[derive(AsRefStr, EnumIter, EnumString, Debug, Display, PartialEq, Eq, Hash, Copy, Clone)]
#[strum(ascii_case_insensitive)]
pub enum HypervisorType {
    None,
    XenServer,
    #[strum(serialize = "KVM")]
    Kvm,
    #[strum(serialize = "VMware")]
    VMware,
    Hyperv,
    VirtualBox,
    Parralels,
    BareMetal,
    Simulator,
    Ovm,
    Ovm3,
    #[strum(serialize = "LXC")]
    Lxc,
    Any,
}

impl HypervisorType {
    /// Hypervisors that ship a system VM template for 4.5.0, in the order the
    /// upgrade processes them.
    pub const SYSTEM_VM_HYPERVISORS: [HypervisorType; 5] = [
        HypervisorType::XenServer,
        HypervisorType::VMware,
        HypervisorType::Kvm,
        HypervisorType::Lxc,
        HypervisorType::Hyperv,
    ];

    pub fn from_db_value(value: Option<&str>) -> HypervisorType {
        value
            .and_then(|s| s.trim().parse::<HypervisorType>().ok())
            .unwrap_or(HypervisorType::None)
    }

    pub fn system_vm_template(&self) -> Option<&'static SystemVmTemplate> {
        match self {
            HypervisorType::XenServer => Some(&XENSERVER_TEMPLATE),
            HypervisorType::VMware => Some(&VMWARE_TEMPLATE),
            HypervisorType::Kvm => Some(&KVM_TEMPLATE),
            HypervisorType::Lxc => Some(&LXC_TEMPLATE),
            HypervisorType::Hyperv => Some(&HYPERV_TEMPLATE),
            _ => None,
        }
    }
}

/// The 4.5.0 system VM image published for one hypervisor family.
#[derive(Debug, PartialEq, Eq)]
pub struct SystemVmTemplate {
    pub name: &'static str,
    pub url: &'static str,
    pub checksum: &'static str,
    /// Global configuration key holding the router template name.
    pub router_config_key: &'static str,
}

const XENSERVER_TEMPLATE: SystemVmTemplate = SystemVmTemplate {
    name: "systemvm-xenserver-4.5",
    url: "http://download.cloud.com/templates/4.5/systemvm64template-4.5-xen.vhd.bz2",
    checksum: "2b15ab4401c2d655264732d3fc600241",
    router_config_key: "router.template.xen",
};

const VMWARE_TEMPLATE: SystemVmTemplate = SystemVmTemplate {
    name: "systemvm-vmware-4.5",
    url: "http://download.cloud.com/templates/4.5/systemvm64template-4.5-vmware.ova",
    checksum: "3106a79a4ce66cd7f6a7c50e93f2db57",
    router_config_key: "router.template.vmware",
};

const KVM_TEMPLATE: SystemVmTemplate = SystemVmTemplate {
    name: "systemvm-kvm-4.5",
    url: "http://download.cloud.com/templates/4.5/systemvm64template-4.5-kvm.qcow2.bz2",
    checksum: "aa9f501fecd3de1daeb9e2f357f6f002",
    router_config_key: "router.template.kvm",
};

// LXC reuses the KVM image
const LXC_TEMPLATE: SystemVmTemplate = SystemVmTemplate {
    name: "systemvm-lxc-4.5",
    url: "http://download.cloud.com/templates/4.5/systemvm64template-4.5-kvm.qcow2.bz2",
    checksum: "aa9f501fecd3de1daeb9e2f357f6f002",
    router_config_key: "router.template.lxc",
};

const HYPERV_TEMPLATE: SystemVmTemplate = SystemVmTemplate {
    name: "systemvm-hyperv-4.5",
    url: "http://download.cloud.com/templates/4.5/systemvm64template-4.5-hyperv.vhd.zip",
    checksum: "70bd30ea02ee9ed67d2c6b85c179cee9",
    router_config_key: "router.template.hyperv",
};
