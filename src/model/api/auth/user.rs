use crate::model::{common::role::OperatorRole, db::admin::Operator};

/// A level of clearance that a request guard can demand.
pub trait Clearance {
    /// Does an operator with the given role have this clearance?
    fn permits(role: OperatorRole) -> bool;
}

/// Any operator, regardless of role.
impl Clearance for Operator {
    fn permits(_role: OperatorRole) -> bool {
        true
    }
}

/// Marker for endpoints restricted to super administrators.
pub struct SuperAdmin;

impl Clearance for SuperAdmin {
    fn permits(role: OperatorRole) -> bool {
        role == OperatorRole::SuperAdmin
    }
}
