use crate::model::common::role::OperatorRole;

/// May an operator with `role` see aggregate results while the election is
/// (or is not) `open`?
///
/// Super administrators can always look. Ordinary administrators only once
/// voting has stopped, or before it has started.
pub fn can_view_results(role: OperatorRole, open: bool) -> bool {
    match role {
        OperatorRole::SuperAdmin => true,
        OperatorRole::Admin => !open,
    }
}
