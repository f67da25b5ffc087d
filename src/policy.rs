//! The authorization table. Every gated route names one `Operation`; the
//! role lists live here and nowhere else, so the whole permission surface is
//! testable as a single table instead of ad hoc checks scattered per handler.

use crate::errors::{AppError, ErrorType};
use crate::models::Role;
use bson::oid::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // users
    ListUsers,
    CreateUser,
    UpdateUser,
    DeleteUser,
    ResetPassword,
    // own session
    Me,
    UpdateOwnPassword,
    // hubs
    ListHubs,
    GetHub,
    CreateHub,
    UpdateHub,
    DeleteHub,
    UpdateHubStatus,
    // devices
    ListDevices,
    GetDevice,
    CreateDevice,
    UpdateDevice,
    DeleteDevice,
    UpdateDeviceStatus,
    // remote gateway
    TestSsh,
    ExecuteCommand,
    DockerStatus,
    DockerStats,
    DockerLogs,
    DockerAction,
    // device groups
    ListDeviceGroups,
    GetDeviceGroup,
    CreateDeviceGroup,
    UpdateDeviceGroup,
    DeleteDeviceGroup,
    AddDeviceToGroup,
    RemoveDeviceFromGroup,
    // command lists
    ListCommandLists,
    GetCommandList,
    CreateCommandList,
    UpdateCommandList,
    DeleteCommandList,
    AddCommand,
    RemoveCommand,
    // profiles
    ListProfiles,
    GetProfile,
    CreateProfile,
    UpdateProfile,
    DeleteProfile,
    AssignOperator,
    RemoveOperator,
    ViewOperatorProfiles,
    // audit trail
    QueryLogs,
}

const ANY_ROLE: &[Role] = &[Role::Admin, Role::TeamLead, Role::Supervisor, Role::Operator];
const MANAGEMENT: &[Role] = &[Role::Admin, Role::TeamLead];
const OVERSIGHT: &[Role] = &[Role::Admin, Role::TeamLead, Role::Supervisor];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

impl Operation {
    pub fn allowed_roles(self) -> &'static [Role] {
        use Operation::*;
        match self {
            Me | UpdateOwnPassword => ANY_ROLE,

            ListHubs | GetHub | UpdateHubStatus => ANY_ROLE,
            CreateHub | UpdateHub | DeleteHub => MANAGEMENT,

            ListDevices | GetDevice | UpdateDeviceStatus => ANY_ROLE,
            CreateDevice | UpdateDevice => OVERSIGHT,
            DeleteDevice => MANAGEMENT,

            // Remote actions are gated on authentication only; destructive
            // docker calls intentionally carry no extra role restriction.
            TestSsh | ExecuteCommand | DockerStatus | DockerStats | DockerLogs | DockerAction => {
                ANY_ROLE
            }

            ListDeviceGroups | GetDeviceGroup => OVERSIGHT,
            CreateDeviceGroup | UpdateDeviceGroup | DeleteDeviceGroup | AddDeviceToGroup
            | RemoveDeviceFromGroup => MANAGEMENT,

            ListCommandLists | GetCommandList => OVERSIGHT,
            CreateCommandList | UpdateCommandList | DeleteCommandList | AddCommand
            | RemoveCommand => MANAGEMENT,

            ListProfiles | GetProfile => OVERSIGHT,
            CreateProfile | UpdateProfile | DeleteProfile | AssignOperator | RemoveOperator => {
                MANAGEMENT
            }
            ViewOperatorProfiles => OVERSIGHT,

            ListUsers | QueryLogs => MANAGEMENT,
            CreateUser | UpdateUser | DeleteUser | ResetPassword => ADMIN_ONLY,
        }
    }

    pub const ALL: &'static [Operation] = &[
        Operation::ListUsers,
        Operation::CreateUser,
        Operation::UpdateUser,
        Operation::DeleteUser,
        Operation::ResetPassword,
        Operation::Me,
        Operation::UpdateOwnPassword,
        Operation::ListHubs,
        Operation::GetHub,
        Operation::CreateHub,
        Operation::UpdateHub,
        Operation::DeleteHub,
        Operation::UpdateHubStatus,
        Operation::ListDevices,
        Operation::GetDevice,
        Operation::CreateDevice,
        Operation::UpdateDevice,
        Operation::DeleteDevice,
        Operation::UpdateDeviceStatus,
        Operation::TestSsh,
        Operation::ExecuteCommand,
        Operation::DockerStatus,
        Operation::DockerStats,
        Operation::DockerLogs,
        Operation::DockerAction,
        Operation::ListDeviceGroups,
        Operation::GetDeviceGroup,
        Operation::CreateDeviceGroup,
        Operation::UpdateDeviceGroup,
        Operation::DeleteDeviceGroup,
        Operation::AddDeviceToGroup,
        Operation::RemoveDeviceFromGroup,
        Operation::ListCommandLists,
        Operation::GetCommandList,
        Operation::CreateCommandList,
        Operation::UpdateCommandList,
        Operation::DeleteCommandList,
        Operation::AddCommand,
        Operation::RemoveCommand,
        Operation::ListProfiles,
        Operation::GetProfile,
        Operation::CreateProfile,
        Operation::UpdateProfile,
        Operation::DeleteProfile,
        Operation::AssignOperator,
        Operation::RemoveOperator,
        Operation::ViewOperatorProfiles,
        Operation::QueryLogs,
    ];
}

pub fn check(op: Operation, role: Role) -> Result<(), AppError> {
    if op.allowed_roles().contains(&role) {
        Ok(())
    } else {
        Err(AppError::new("Not authorized", ErrorType::Forbidden))
    }
}

/// Self-access exception layered on top of the table: an operator may always
/// read their own profile assignments.
pub fn check_operator_profiles_access(
    actor_id: &ObjectId,
    actor_role: Role,
    target_user: &ObjectId,
) -> Result<(), AppError> {
    if actor_id == target_user {
        return Ok(());
    }
    check(Operation::ViewOperatorProfiles, actor_role).map_err(|_| {
        AppError::new(
            "Not authorized to view other users' profiles",
            ErrorType::Forbidden,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_total_and_deterministic() {
        for &op in Operation::ALL {
            for &role in ANY_ROLE {
                let first = check(op, role).is_ok();
                let second = check(op, role).is_ok();
                assert_eq!(first, second);
                // Totality: allowed_roles never panics and is non-empty.
                assert!(!op.allowed_roles().is_empty());
            }
        }
    }

    #[test]
    fn admin_is_allowed_everything() {
        for &op in Operation::ALL {
            assert!(check(op, Role::Admin).is_ok());
        }
    }

    #[test]
    fn operator_cannot_manage_entities() {
        for op in [
            Operation::CreateHub,
            Operation::UpdateHub,
            Operation::DeleteHub,
            Operation::CreateDevice,
            Operation::DeleteDevice,
            Operation::CreateDeviceGroup,
            Operation::CreateCommandList,
            Operation::CreateProfile,
            Operation::ListUsers,
            Operation::CreateUser,
            Operation::QueryLogs,
        ] {
            let err = check(op, Role::Operator).unwrap_err();
            assert_eq!(err.message, "Not authorized");
            assert_eq!(err.err_type, ErrorType::Forbidden);
        }
    }

    #[test]
    fn any_authenticated_role_can_read_hubs_and_devices() {
        for role in [Role::Admin, Role::TeamLead, Role::Supervisor, Role::Operator] {
            assert!(check(Operation::ListHubs, role).is_ok());
            assert!(check(Operation::GetDevice, role).is_ok());
            assert!(check(Operation::DockerAction, role).is_ok());
            assert!(check(Operation::ExecuteCommand, role).is_ok());
        }
    }

    #[test]
    fn supervisor_views_but_does_not_mutate_planning_entities() {
        assert!(check(Operation::ListDeviceGroups, Role::Supervisor).is_ok());
        assert!(check(Operation::GetCommandList, Role::Supervisor).is_ok());
        assert!(check(Operation::ListProfiles, Role::Supervisor).is_ok());
        assert!(check(Operation::CreateDeviceGroup, Role::Supervisor).is_err());
        assert!(check(Operation::UpdateCommandList, Role::Supervisor).is_err());
        assert!(check(Operation::DeleteProfile, Role::Supervisor).is_err());
        // Device create is the one mutation supervisors hold.
        assert!(check(Operation::CreateDevice, Role::Supervisor).is_ok());
        assert!(check(Operation::DeleteDevice, Role::Supervisor).is_err());
    }

    #[test]
    fn user_management_is_admin_only() {
        for role in [Role::TeamLead, Role::Supervisor, Role::Operator] {
            assert!(check(Operation::CreateUser, role).is_err());
            assert!(check(Operation::DeleteUser, role).is_err());
            assert!(check(Operation::ResetPassword, role).is_err());
        }
        assert!(check(Operation::ListUsers, Role::TeamLead).is_ok());
    }

    #[test]
    fn operators_read_their_own_profiles_only() {
        let me = ObjectId::new();
        let someone_else = ObjectId::new();

        assert!(check_operator_profiles_access(&me, Role::Operator, &me).is_ok());
        let err = check_operator_profiles_access(&me, Role::Operator, &someone_else).unwrap_err();
        assert_eq!(err.message, "Not authorized to view other users' profiles");

        // Oversight roles can read anyone's assignments.
        assert!(check_operator_profiles_access(&me, Role::Supervisor, &someone_else).is_ok());
        assert!(check_operator_profiles_access(&me, Role::Admin, &someone_else).is_ok());
    }
}
