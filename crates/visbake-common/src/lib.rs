pub mod v_shared;
pub mod sampling;
