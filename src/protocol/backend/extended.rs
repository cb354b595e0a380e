//! Extended query protocol backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended
//! carry no payload and are plain [`BackendMessage`](super::BackendMessage)
//! variants.

use crate::error::Result;
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription message - parameter types of the parsed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_params, mut data) = read_u16(payload)?;
        let mut param_oids = Vec::with_capacity(num_params as usize);

        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }

        Ok(Self { param_oids })
    }

    /// Get the number of parameters.
    pub fn len(&self) -> usize {
        self.param_oids.len()
    }

    /// Check if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.param_oids.is_empty()
    }

    /// Get parameter type OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Take the parameter type OIDs.
    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

impl From<Vec<Oid>> for ParameterDescription {
    fn from(param_oids: Vec<Oid>) -> Self {
        Self { param_oids }
    }
}
