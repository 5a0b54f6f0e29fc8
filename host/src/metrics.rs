use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    // HTTP metrics
    pub static ref HTTP_REQUEST_COUNT: IntCounter = register_int_counter!(
        "reyestr_http_request_count",
        "the number of HTTP requests"
    )
    .unwrap();

    // Dispatcher metrics
    pub static ref TASK_CREATED_COUNT: IntCounter = register_int_counter!(
        "reyestr_task_created_count",
        "the number of tasks created"
    )
    .unwrap();
    pub static ref TASK_CLAIMED_COUNT: IntCounter = register_int_counter!(
        "reyestr_task_claimed_count",
        "the number of tasks claimed by workers"
    )
    .unwrap();
    pub static ref TASK_COMPLETED_COUNT: IntCounter = register_int_counter!(
        "reyestr_task_completed_count",
        "the number of tasks completed"
    )
    .unwrap();
    pub static ref TASK_FAILED_COUNT: IntCounter = register_int_counter!(
        "reyestr_task_failed_count",
        "the number of tasks failed by workers"
    )
    .unwrap();
    pub static ref TASK_RECLAIMED_COUNT: IntCounter = register_int_counter!(
        "reyestr_task_reclaimed_count",
        "the number of stalled tasks returned to the queue"
    )
    .unwrap();

    // Registrar metrics
    pub static ref DOCUMENT_REGISTERED_COUNT: IntCounter = register_int_counter!(
        "reyestr_document_registered_count",
        "the number of documents registered"
    )
    .unwrap();
    pub static ref WORKER_REGISTERED_COUNT: IntCounter = register_int_counter!(
        "reyestr_worker_registered_count",
        "the number of worker registrations"
    )
    .unwrap();
}

pub fn inc_http_request_count() {
    HTTP_REQUEST_COUNT.inc();
}

pub fn inc_task_created_count() {
    TASK_CREATED_COUNT.inc();
}

pub fn inc_task_claimed_count() {
    TASK_CLAIMED_COUNT.inc();
}

pub fn inc_task_completed_count() {
    TASK_COMPLETED_COUNT.inc();
}

pub fn inc_task_failed_count() {
    TASK_FAILED_COUNT.inc();
}

pub fn add_task_reclaimed_count(count: u64) {
    TASK_RECLAIMED_COUNT.inc_by(count);
}

pub fn inc_document_registered_count() {
    DOCUMENT_REGISTERED_COUNT.inc();
}

pub fn inc_worker_registered_count() {
    WORKER_REGISTERED_COUNT.inc();
}
