use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chaos_inject_engine::config::Config;
use chaos_inject_engine::handler::action::{Canned, Executor, FixedDraw, RecordingSleeper};
use chaos_inject_engine::handler::fault::Fault;
use chaos_inject_engine::handler::rule::{keys, ResponseVerb, RouteMatcher, RuleBuilder};
use chaos_inject_engine::handler::selector::{Actor, HostIdentity};
use chaos_inject_engine::intercept::route::{RouteResolver, RouteTable};
use chaos_inject_engine::raw_config::RawRoute;
use chaos_inject_engine::Engine;
use http::StatusCode;
use hyper::service::{make_service_fn, service_fn, Service};
use hyper::{Body, Client, Request, Response, Server};

fn route(name: &str, path: &str, namespace: &str) -> RawRoute {
    RawRoute {
        name: Some(name.to_string()),
        path: path.to_string(),
        namespaces: vec![namespace.to_string()],
    }
}

fn engine(draw: f64) -> (Engine, Arc<RecordingSleeper>) {
    let mut config = Config::new(HostIdentity::new("web-1", "web-1.example.org"));
    config.routes = RouteTable::new(vec![
        route("home", "/", "site").into(),
        route("checkout", "/checkout/*", "shop").into(),
        route("admin", "/admin/*", "admin").into(),
    ]);
    config.ignore.response.insert("admin".to_string());
    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = Executor::new(Arc::new(FixedDraw(draw)), sleeper.clone());
    (Engine::from_config(config, executor).unwrap(), sleeper)
}

fn ret(route: &str, code: &str) -> RuleBuilder<RouteMatcher> {
    RuleBuilder::response(ResponseVerb::Return, route).config(keys::STATUS_CODE, code)
}

#[test]
fn test_status_code_effects() {
    let (engine, _) = engine(0.0);
    let home = engine.routes().resolve("/").unwrap();

    let rule = engine.store.insert(ret("home", "403")).unwrap();
    assert_eq!(
        engine.response.intercept(&home, &Actor::Anonymous).err(),
        Some(Fault::PermissionDenied)
    );
    engine.store.delete::<RouteMatcher>(rule.id).unwrap();

    let rule = engine.store.insert(ret("home", "500")).unwrap();
    let response = engine
        .response
        .intercept(&home, &Actor::Anonymous)
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.extensions().get::<Canned>(), Some(&Canned::ServerError));
    engine.store.delete::<RouteMatcher>(rule.id).unwrap();

    engine.store.insert(ret("home", "1000")).unwrap();
    let response = engine
        .response
        .intercept(&home, &Actor::Anonymous)
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_probability_gate() {
    let (engine, _) = engine(50.0);
    let home = engine.routes().resolve("/").unwrap();
    let probability = |percent| {
        chaos_inject_engine::handler::rule::Probability::new(percent).unwrap()
    };

    engine
        .store
        .insert(ret("home", "418").probability(probability(49.99999)))
        .unwrap();
    assert!(engine
        .response
        .intercept(&home, &Actor::Anonymous)
        .unwrap()
        .is_none());

    engine
        .store
        .insert(ret("home", "418").probability(probability(50.0)))
        .unwrap();
    assert!(engine
        .response
        .intercept(&home, &Actor::Anonymous)
        .unwrap()
        .is_some());
}

#[test]
fn test_host_scope() {
    let (engine, sleeper) = engine(0.0);
    let home = engine.routes().resolve("/").unwrap();
    let slow = |host: &str| {
        RuleBuilder::response(ResponseVerb::Slow, "")
            .on_host(host)
            .config(keys::SLOW_MIN, "3")
            .config(keys::SLOW_MAX, "3")
    };
    engine.store.insert(slow("web-2")).unwrap();
    engine.store.insert(slow("WEB-1.example.org")).unwrap();
    engine.store.insert(slow("web")).unwrap();
    engine.store.insert(slow("")).unwrap();

    assert!(engine
        .response
        .intercept(&home, &Actor::Anonymous)
        .unwrap()
        .is_none());
    assert_eq!(sleeper.slept(), vec![Duration::from_millis(3); 2]);
}

async fn serve(engine: &Engine) -> SocketAddr {
    let chaos = engine.service(service_fn(|_: Request<Body>| async {
        Ok::<_, Infallible>(Response::new(Body::from("hello")))
    }));
    let make_service = make_service_fn(move |_| {
        let chaos = chaos.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let mut chaos = chaos.clone();
                async move {
                    let response = match chaos.call(req).await {
                        Ok(response) => response,
                        Err(e) => match e.downcast::<Fault>() {
                            Ok(fault) => fault.into_response(),
                            Err(e) => {
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::BAD_GATEWAY;
                                response
                            }
                        },
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });
    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server
            .await
            .map_err(|e| tracing::error!("{:?}", e));
    });
    addr
}

async fn get(addr: SocketAddr, path: &str) -> (StatusCode, String) {
    let uri = format!("http://{}{}", addr, path).parse().unwrap();
    let response = Client::new().get(uri).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_http_service() {
    let (engine, _) = engine(0.0);
    let addr = serve(&engine).await;

    assert_eq!(get(addr, "/").await, (StatusCode::OK, "hello".to_string()));

    let rule = engine.store.insert(ret("home", "503")).unwrap();
    assert_eq!(
        get(addr, "/").await,
        (StatusCode::SERVICE_UNAVAILABLE, "Chaos response 503".to_string())
    );
    // other routes, ignored applications and unroutable paths pass through
    assert_eq!(get(addr, "/checkout/1").await.0, StatusCode::OK);
    assert_eq!(get(addr, "/missing").await.0, StatusCode::OK);
    engine.store.delete::<RouteMatcher>(rule.id).unwrap();

    engine
        .store
        .insert(RuleBuilder::response(ResponseVerb::Raise, "").config(keys::EXCEPTION, "faults.Timeout"))
        .unwrap();
    assert_eq!(get(addr, "/checkout/1").await.0, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(get(addr, "/admin/users").await.0, StatusCode::OK);

    // the newest rule is evaluated first and short-circuits
    tokio::time::sleep(Duration::from_millis(2)).await;
    engine.store.insert(ret("checkout", "404")).unwrap();
    assert_eq!(get(addr, "/checkout/1").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(addr, "/").await.0, StatusCode::GATEWAY_TIMEOUT);

    // rules out of scope are skipped
    tokio::time::sleep(Duration::from_millis(2)).await;
    engine
        .store
        .insert(ret("checkout", "418").for_groups(vec!["qa"]))
        .unwrap();
    engine
        .store
        .insert(RuleBuilder::response(ResponseVerb::Raise, "checkout").enabled(false))
        .unwrap();
    assert_eq!(get(addr, "/checkout/1").await.0, StatusCode::NOT_FOUND);
}
