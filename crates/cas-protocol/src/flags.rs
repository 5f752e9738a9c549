//! Request flag sets.

use bitflags::bitflags;

bitflags! {
    /// Options for a prepare request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrepareFlags: u8 {
        /// Prepare a result set that can be updated in place.
        const UPDATABLE = 0x02;
        /// Prepare a CALL statement with output parameters.
        const CALL = 0x40;
        /// Keep the result set open across commits.
        const HOLDABLE = 0x08;
    }
}

bitflags! {
    /// Options for an execute request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExecuteFlags: u8 {
        /// Fetch the whole result set with the execute reply.
        const ASYNC = 0x01;
        /// Request query plan information.
        const QUERY_INFO = 0x04;
        /// Return only the query plan; implies `QUERY_INFO`.
        const ONLY_QUERY_PLAN = 0x08;
    }
}

impl ExecuteFlags {
    /// Normalise implied flags.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.contains(Self::ONLY_QUERY_PLAN) {
            self | Self::QUERY_INFO
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_query_plan_implies_query_info() {
        let flags = ExecuteFlags::ONLY_QUERY_PLAN.normalized();
        assert!(flags.contains(ExecuteFlags::QUERY_INFO));
        assert_eq!(ExecuteFlags::ASYNC.normalized(), ExecuteFlags::ASYNC);
    }
}
