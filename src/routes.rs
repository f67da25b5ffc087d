use crate::audit::LogQuery;
use crate::filters::{with_auth, with_ctx, with_json_body, with_meta, AppContext};
use crate::handlers;
use warp::Filter;
use warp_rate_limit::{with_rate_limit, RateLimitConfig};

/// Every API route under one filter; liveness and the docs live in main.
pub fn api_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    auth_routes(ctx.clone())
        .or(hub_routes(ctx.clone()))
        .or(device_routes(ctx.clone()))
        .or(device_group_routes(ctx.clone()))
        .or(command_list_routes(ctx.clone()))
        .or(profile_routes(ctx.clone()))
        .or(user_routes(ctx.clone()))
        .or(log_routes(ctx))
}

fn auth_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // 5 requests per 5 minutes on the two unauthenticated routes
    let public_routes_rate_limit = RateLimitConfig::max_per_window(5, 5 * 60);

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(with_rate_limit(public_routes_rate_limit.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::auth::login_handler);

    let reset_admin_password = warp::path!("auth" / "reset-admin-password")
        .and(warp::post())
        .and(with_rate_limit(public_routes_rate_limit))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::auth::reset_admin_password_handler);

    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::auth::me_handler);

    let update_password = warp::path!("auth" / "update-password")
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::auth::update_password_handler);

    let reset_password = warp::path!("auth" / "reset-password")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx))
        .and_then(handlers::auth::reset_password_handler);

    login
        .or(reset_admin_password)
        .or(me)
        .or(update_password)
        .or(reset_password)
}

fn hub_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("hubs")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::hubs::list_hubs_handler);

    let create = warp::path!("hubs")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::hubs::create_hub_handler);

    let get = warp::path!("hubs" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::hubs::get_hub_handler);

    let update = warp::path!("hubs" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::hubs::update_hub_handler);

    let delete = warp::path!("hubs" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::hubs::delete_hub_handler);

    let status = warp::path!("hubs" / String / "status")
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx))
        .and_then(handlers::hubs::update_hub_status_handler);

    list.or(create).or(status).or(get).or(update).or(delete)
}

fn device_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("devices")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::list_devices_handler);

    let create = warp::path!("devices")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::create_device_handler);

    let get = warp::path!("devices" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::get_device_handler);

    let update = warp::path!("devices" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::update_device_handler);

    let delete = warp::path!("devices" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::delete_device_handler);

    let status = warp::path!("devices" / String / "status")
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::devices::update_device_status_handler);

    let test_ssh = warp::path!("devices" / String / "test-ssh")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::remote_actions::test_ssh_handler);

    let execute_command = warp::path!("devices" / String / "execute-command")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::remote_actions::execute_command_handler);

    let docker_status = warp::path!("devices" / String / "docker-status")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::remote_actions::docker_status_handler);

    let docker_stats = warp::path!("devices" / String / "docker-stats")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::remote_actions::docker_stats_handler);

    let docker_logs = warp::path!("devices" / String / "docker-logs")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::remote_actions::docker_logs_handler);

    let docker_action = warp::path!("devices" / String / "docker-action")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx))
        .and_then(handlers::remote_actions::docker_action_handler);

    list.or(create)
        .or(status)
        .or(test_ssh)
        .or(execute_command)
        .or(docker_status)
        .or(docker_stats)
        .or(docker_logs)
        .or(docker_action)
        .or(get)
        .or(update)
        .or(delete)
}

fn device_group_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("device-groups")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::list_device_groups_handler);

    let create = warp::path!("device-groups")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::create_device_group_handler);

    let get = warp::path!("device-groups" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::get_device_group_handler);

    let update = warp::path!("device-groups" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::update_device_group_handler);

    let delete = warp::path!("device-groups" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::delete_device_group_handler);

    let add_device = warp::path!("device-groups" / String / "devices")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::device_groups::add_device_handler);

    let remove_device = warp::path!("device-groups" / String / "devices" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx))
        .and_then(handlers::device_groups::remove_device_handler);

    list.or(create)
        .or(add_device)
        .or(remove_device)
        .or(get)
        .or(update)
        .or(delete)
}

fn command_list_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("command-lists")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::list_command_lists_handler);

    let create = warp::path!("command-lists")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::create_command_list_handler);

    let get = warp::path!("command-lists" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::get_command_list_handler);

    let update = warp::path!("command-lists" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::update_command_list_handler);

    let delete = warp::path!("command-lists" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::delete_command_list_handler);

    let add_command = warp::path!("command-lists" / String / "commands")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::command_lists::add_command_handler);

    let remove_command = warp::path!("command-lists" / String / "commands" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx))
        .and_then(handlers::command_lists::remove_command_handler);

    list.or(create)
        .or(add_command)
        .or(remove_command)
        .or(get)
        .or(update)
        .or(delete)
}

fn profile_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("profiles")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::list_profiles_handler);

    let create = warp::path!("profiles")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::create_profile_handler);

    // must be matched before profiles/:id
    let operator_profiles = warp::path!("profiles" / "operator" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::operator_profiles_handler);

    let get = warp::path!("profiles" / String)
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::get_profile_handler);

    let update = warp::path!("profiles" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::update_profile_handler);

    let delete = warp::path!("profiles" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::delete_profile_handler);

    let assign_operator = warp::path!("profiles" / String / "operators")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::profiles::assign_operator_handler);

    let remove_operator = warp::path!("profiles" / String / "operators" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx))
        .and_then(handlers::profiles::remove_operator_handler);

    list.or(create)
        .or(operator_profiles)
        .or(assign_operator)
        .or(remove_operator)
        .or(get)
        .or(update)
        .or(delete)
}

fn user_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list = warp::path!("users")
        .and(warp::get())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::users::list_users_handler);

    let create = warp::path!("users")
        .and(warp::post())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::users::create_user_handler);

    let update = warp::path!("users" / String)
        .and(warp::put())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_json_body())
        .and(with_ctx(ctx.clone()))
        .and_then(handlers::users::update_user_handler);

    let delete = warp::path!("users" / String)
        .and(warp::delete())
        .and(with_auth(ctx.clone()))
        .and(with_meta())
        .and(with_ctx(ctx))
        .and_then(handlers::users::delete_user_handler);

    list.or(create).or(update).or(delete)
}

fn log_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("logs")
        .and(warp::get())
        .and(warp::query::<LogQuery>())
        .and(with_auth(ctx.clone()))
        .and(with_ctx(ctx))
        .and_then(handlers::logs::query_logs_handler)
}
