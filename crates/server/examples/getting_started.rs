use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use waypoint_core::binder::{ListAction, ParamSpec};
use waypoint_core::error::CallError;
use waypoint_core::handler::handler_fn;
use waypoint_core::middleware::{Auth, Credentials, RateLimit, authenticate_fn, guard_fn};
use waypoint_core::registry::{DEFAULT_CLASS, HandlerClass, HandlerGroup, Registry, get, post};
use waypoint_core::{Args, Config, Dispatcher, Request};
use waypoint_server::Server;

// curl -v http://127.0.0.1:8080/
async fn root(_req: Arc<Request>, _args: Args) -> Result<&'static str, CallError> {
    Ok("welcome")
}

// curl -v http://127.0.0.1:8080/echo/anything
async fn echo(_req: Arc<Request>, args: Args) -> Result<String, CallError> {
    Ok(args.pos_str(0).unwrap_or_default().to_owned())
}

// curl -v -H 'Accept: application/json;version=v2' http://127.0.0.1:8080/echo/anything
async fn echo_v2(_req: Arc<Request>, args: Args) -> Result<serde_json::Value, CallError> {
    Ok(json!({"echo": args.pos_str(0)}))
}

// curl -v -d 'name=che&tags=a,b' 'http://127.0.0.1:8080/users?limit=5'
async fn create_user(_req: Arc<Request>, args: Args) -> Result<serde_json::Value, CallError> {
    Ok(json!({
        "name": args.str("name"),
        "tags": args.get("tags"),
        "limit": args.int("limit"),
    }))
}

// curl -v -H 'Authorization: Bearer sekret' http://127.0.0.1:8080/private
async fn private(_req: Arc<Request>, args: Args) -> Result<String, CallError> {
    Ok(format!("hello, {}", args.str("identity").unwrap_or("stranger")))
}

async fn mobile_root(_req: Arc<Request>, _args: Args) -> Result<&'static str, CallError> {
    Ok("welcome, tiny screen")
}

#[tokio::main]
async fn main() {
    let validator = authenticate_fn(|credentials| async move {
        match credentials {
            Credentials::Bearer { token } if token == "sekret" => Ok(json!("alice")),
            _ => Err(CallError::authorization_failed("unknown token")),
        }
    });

    let registry = Registry::builder()
        .root(
            HandlerGroup::builder("app")
                .class(
                    HandlerClass::builder(DEFAULT_CLASS)
                        .method(
                            get(handler_fn(mobile_root))
                                .with(guard_fn(|req| {
                                    req.header("user-agent").is_some_and(|ua| ua.contains("Mobile"))
                                })),
                        )
                        .method(get(handler_fn(root)).with(guard_fn(|req| {
                            req.header("user-agent").is_none_or(|ua| !ua.contains("Mobile"))
                        })))
                        .build()
                        .unwrap(),
                )
                .class(
                    HandlerClass::builder("Echo")
                        .method(get(handler_fn(echo)).path_param(ParamSpec::text("word")))
                        .method(
                            get(handler_fn(echo_v2)).version("v2").path_param(ParamSpec::text("word")),
                        )
                        .build()
                        .unwrap(),
                )
                .class(
                    HandlerClass::builder("Users")
                        .method(
                            post(handler_fn(create_user))
                                .param(ParamSpec::text("name").min_size(1.0).max_size(64.0))
                                .param(ParamSpec::text("tags").list(ListAction::RepeatSplit).default(json!([])))
                                .param(ParamSpec::integer("limit").default(json!(10)))
                                .with(RateLimit::new(30, Duration::from_secs(60))),
                        )
                        .build()
                        .unwrap(),
                )
                .class(
                    HandlerClass::builder("Private")
                        .method(
                            get(handler_fn(private))
                                .param(ParamSpec::text("identity").optional())
                                .with(Auth::bearer("api", validator).inject_as("identity")),
                        )
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    Server::builder()
        .address("127.0.0.1:8080")
        .config(&Config::from_env())
        .dispatcher(Dispatcher::new(registry))
        .build()
        .unwrap()
        .start()
        .await;
}
