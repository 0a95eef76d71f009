use actix_web::{App, HttpServer, middleware::Logger, web};
use std::{io, sync::Arc, time::Duration};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::dialogue::{DialogueEngine, EngineSettings};
use crate::ledger::Ledger;
use crate::notify::{NotificationProvider, Notifier, SmsGatewayClient};
use crate::payment::MobileMoneyClient;
use crate::server::{AppState, WebhookSettings, routes};
use crate::session::{SessionStore, start_eviction_task};

mod catalog;
mod channel;
mod config;
mod details;
mod dialogue;
mod error;
mod intent;
mod ledger;
mod model;
mod notify;
mod payment;
mod replies;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod webhook;

const EVICTION_PERIOD: Duration = Duration::from_secs(300);

fn startup_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::other(err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(startup_error)?;

    let channel: Arc<dyn channel::MessageChannel> =
        Arc::from(channel::from_config(&config.messaging, config.http_timeout).map_err(startup_error)?);
    let payments = Arc::new(
        MobileMoneyClient::new(config.payment.clone(), config.http_timeout).map_err(startup_error)?,
    );
    let provider: Option<Arc<dyn NotificationProvider>> = match &config.notify {
        Some(notify) => Some(Arc::new(
            SmsGatewayClient::new(notify.clone(), config.http_timeout).map_err(startup_error)?,
        )),
        None => {
            log::warn!("No notification provider configured; SMS and voice confirmations disabled");
            None
        }
    };
    let notifier = Arc::new(Notifier::new(
        provider,
        channel.clone(),
        &config.payment.currency,
    ));

    let ledger = Arc::new(Ledger::new(Arc::new(Catalog::seeded()), config.deposit_percent));
    let sessions = Arc::new(SessionStore::new(config.session_ttl));
    start_eviction_task(sessions.clone(), EVICTION_PERIOD);

    let engine = Arc::new(DialogueEngine::new(
        sessions,
        ledger,
        payments,
        notifier,
        EngineSettings {
            currency: config.payment.currency.clone(),
            payment_channel: config.payment.channel.clone(),
            payment_account: config.payment.account.clone(),
            callback_url: config.payment.callback_url.clone(),
            deposit_percent: config.deposit_percent,
        },
    ));
    let state = web::Data::new(AppState::new(
        engine,
        channel,
        WebhookSettings::from_config(&config),
    ));

    log::info!("🚀 Kibo Car Rentals WhatsApp Server starting on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
