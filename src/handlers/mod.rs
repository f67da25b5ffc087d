pub mod auth;
pub mod command_lists;
pub mod device_groups;
pub mod devices;
pub mod hubs;
pub mod logs;
pub mod profiles;
pub mod remote_actions;
pub mod users;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
            auth::login_handler,
            devices::list_devices_handler,
            remote_actions::execute_command_handler
        )
    )
]
pub struct MonitorApi;
