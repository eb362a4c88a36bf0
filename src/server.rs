use crate::automation::Notifier;
use crate::job::{Queue, PRIORITY_RELEASE};
use crate::store::Store;
use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use tagsync_api::job::{JobId, JobSubmitted};
use tagsync_api::{ImageRef, ReleaseImageSpec, ReleaseRequest};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(serde::Deserialize)]
struct Notification {
    image: String,
}

#[get("/api/v1/workloads")]
async fn get_workloads(store: web::Data<Store>) -> impl Responder {
    HttpResponse::Ok().json(store.all())
}

#[post("/api/v1/release")]
async fn post_release(
    request: web::Json<ReleaseRequest>,
    queue: web::Data<Queue>,
) -> impl Responder {
    match ReleaseImageSpec::try_from(request.into_inner()) {
        Ok(spec) => {
            let job_id = queue.submit(spec, PRIORITY_RELEASE);
            HttpResponse::Ok().json(JobSubmitted { job_id })
        }
        Err(err) => HttpResponse::BadRequest().body(err.to_string()),
    }
}

#[get("/api/v1/jobs/{id}")]
async fn get_job(path: web::Path<String>, queue: web::Data<Queue>) -> impl Responder {
    let Ok(id) = path.into_inner().parse::<JobId>() else {
        return HttpResponse::BadRequest().body("invalid job ID");
    };

    match queue.status(id) {
        Some(status) => HttpResponse::Ok().json(status),
        None => HttpResponse::NotFound().finish(),
    }
}

#[post("/api/v1/notify")]
async fn post_notify(
    notification: web::Json<Notification>,
    notifier: web::Data<Notifier>,
) -> impl Responder {
    match notification.image.parse::<ImageRef>() {
        Ok(image) => {
            notifier.notify(&image);
            HttpResponse::Accepted().finish()
        }
        Err(err) => HttpResponse::BadRequest().body(err.to_string()),
    }
}

fn configure(store: Store, queue: Queue, notifier: Notifier) -> impl Fn(&mut web::ServiceConfig) + Clone {
    let store = web::Data::new(store);
    let queue = web::Data::new(queue);
    let notifier = web::Data::new(notifier);

    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(store.clone())
            .app_data(queue.clone())
            .app_data(notifier.clone())
            .service(get_workloads)
            .service(post_release)
            .service(get_job)
            .service(post_notify);
    }
}

pub async fn run(
    config: ServerConfig,
    store: Store,
    queue: Queue,
    notifier: Notifier,
) -> anyhow::Result<()> {
    let configure = configure(store, queue, notifier);

    HttpServer::new(move || {
        let cors = Cors::default()
            .send_wildcard()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new().wrap(cors).configure(configure.clone())
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
