//! Test data builders for creating test objects

use super::TABLE_ADDRESS;
use mcu_link::backend::{MockDataPattern, MockTransport};
use mcu_link::config::AcquisitionConfig;
use mcu_link::types::{AccessMode, VarType, VariableDescriptor};

/// Builder for creating test VariableDescriptors
pub struct VariableBuilder {
    name: String,
    address: u64,
    var_type: VarType,
    access: AccessMode,
    category: Option<String>,
}

impl VariableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: 0x2000_0000,
            var_type: VarType::U32,
            access: AccessMode::ReadOnly,
            category: None,
        }
    }

    pub fn address(mut self, address: u64) -> Self {
        self.address = address;
        self
    }

    pub fn var_type(mut self, var_type: VarType) -> Self {
        self.var_type = var_type;
        self
    }

    pub fn writable(mut self) -> Self {
        self.access = AccessMode::ReadWrite;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn build(self) -> VariableDescriptor {
        let var = VariableDescriptor::new(self.name, self.address, self.var_type, self.access);
        match self.category {
            Some(category) => var.with_category(category),
            None => var,
        }
    }
}

/// One probe ("ProbeA") and a table with a single read-only float `temp`
pub fn probe_a_with_temp() -> MockTransport {
    MockTransport::new()
        .with_probe("ProbeA")
        .with_descriptor_table(
            TABLE_ADDRESS,
            vec![VariableBuilder::new("temp")
                .address(0x2000_0000)
                .var_type(VarType::F32)
                .build()],
        )
        .with_pattern(
            0x2000_0000,
            MockDataPattern::Sine {
                frequency: 1.0,
                amplitude: 2.0,
                offset: 25.0,
            },
        )
}

/// Acquisition settings with auto-discovery pointed at [`TABLE_ADDRESS`]
pub fn acquisition_config(poll_interval_ms: u64) -> AcquisitionConfig {
    AcquisitionConfig {
        poll_interval_ms,
        buffer_capacity: 1000,
        descriptor_address: TABLE_ADDRESS,
        ..AcquisitionConfig::default()
    }
}
