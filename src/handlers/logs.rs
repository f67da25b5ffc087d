use crate::audit::LogQuery;
use crate::filters::{AppContext, AuthUser};
use crate::policy::{self, Operation};

/// Read side of the audit trail. Queries are not themselves audited.
pub async fn query_logs_handler(
    query: LogQuery,
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::QueryLogs, auth.role).map_err(|err| err.reject())?;

    let page = ctx.audit.query(&query).await.map_err(|err| err.reject())?;

    Ok(warp::reply::json(&page))
}
