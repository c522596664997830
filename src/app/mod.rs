pub mod map_use_case;
pub mod ports;
pub mod resolve_use_case;
