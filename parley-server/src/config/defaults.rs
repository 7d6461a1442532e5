//! Default configuration values
//!
//! Embedded in the binary; printed by `parley-server --print-default-config`.

/// Default configuration as TOML
pub const DEFAULT_CONFIG_TOML: &str = r##"
# parley configuration

[server]
host = "0.0.0.0"
port = 4040
# Capacity of the registry's shared event intake
intake_capacity = 8

[session]
# Messages buffered per client before fan-out blocks
outbox_capacity = 8
# Disconnect clients that send nothing for this long
idle_timeout_secs = 300
max_line_length = 65536
# Time a departing client gets to receive what is still queued for it
drain_timeout_secs = 5

[echo]
enabled = true
host = "0.0.0.0"
port = 4041
read_timeout_secs = 10
"##;
