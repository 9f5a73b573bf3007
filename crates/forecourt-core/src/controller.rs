// ── Transaction controller ──
//
// The fueling state machine. One session at a time, driven by polling
// devices that only ever answer. Errors that a session can survive are
// turned into an abort code on the screen; anything else ends `run`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use forecourt_link::Registry;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::devices::{Authorizer, CardReader, FlowMeter, Hose, Screen, Station};
use crate::error::{AbortCode, CoreError};
use crate::fueling::{self, Delivery};
use crate::presenter::ScreenPresenter;
use crate::timer::IdleTimer;

const AUTH_NO: &str = "AUTH_NO";
const GRADE_SELECTED: &str = "GRADE_SELECTED:";

// ── CycleOutcome ─────────────────────────────────────────────────

/// How one pass through the state machine ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The authorizer turned the card down.
    Declined,
    /// An inactivity window elapsed before the customer acted.
    Abandoned,
    /// The tank filled.
    Completed { gallons: f64, dollars: f64 },
    /// The pump was disarmed from outside mid-delivery.
    Stopped,
    /// The nozzle stayed out longer than the grace period.
    DetachTimeout,
    Aborted(AbortCode),
    /// Shutdown was requested while waiting.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ready,
    Welcome,
}

enum Wait<T> {
    Done(T),
    Elapsed,
    Interrupted,
}

// ── TransactionController ────────────────────────────────────────

pub struct TransactionController {
    registry: Arc<Registry>,
    config: ControllerConfig,
    screen: Screen,
    presenter: Arc<ScreenPresenter>,
    idle: IdleTimer,
}

impl TransactionController {
    /// Open the screen link and wire the idle timer to the presenter.
    /// Other devices are opened on first use.
    pub async fn connect(
        registry: Arc<Registry>,
        config: ControllerConfig,
    ) -> Result<Self, CoreError> {
        if !(config.sim_speed.is_finite() && config.sim_speed > 0.0) {
            return Err(CoreError::Config {
                message: format!("sim_speed must be positive, got {}", config.sim_speed),
            });
        }
        let link = registry.link(&config.roles.screen).await?;
        let screen = Screen::new(link, config.timing.request_timeout);
        let presenter = Arc::new(ScreenPresenter::new(screen.clone()));
        let idle = IdleTimer::new(config.timing.idle_window, presenter.clone());

        Ok(Self {
            registry,
            config,
            screen,
            presenter,
            idle,
        })
    }

    pub fn presenter(&self) -> &ScreenPresenter {
        &self.presenter
    }

    pub fn idle_timer(&self) -> &IdleTimer {
        &self.idle
    }

    /// Serve customers until `shutdown` fires or a fatal error occurs,
    /// then close every link.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CoreError> {
        info!("controller started");
        let result = self.serve(&shutdown).await;

        self.idle.cancel("shutdown").await;
        let closed = self.registry.close_all().await;
        info!("controller stopped");

        result?;
        Ok(closed?)
    }

    /// READY → WELCOME → one session.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CoreError> {
        self.cycle(Stage::Ready, &CancellationToken::new()).await
    }

    async fn serve(&self, shutdown: &CancellationToken) -> Result<(), CoreError> {
        let mut stage = Stage::Ready;
        while !shutdown.is_cancelled() {
            stage = match self.cycle(stage, shutdown).await? {
                CycleOutcome::Interrupted => break,
                CycleOutcome::Declined => Stage::Ready,
                _ => Stage::Welcome,
            };
        }
        Ok(())
    }

    async fn cycle(
        &self,
        stage: Stage,
        shutdown: &CancellationToken,
    ) -> Result<CycleOutcome, CoreError> {
        if stage == Stage::Ready {
            let answer = self.screen.ready().await?;
            debug!(%answer, "screen ready");
        }
        self.presenter.show_welcome().await?;

        let Some(tap) = self.await_tap(shutdown).await? else {
            return Ok(CycleOutcome::Interrupted);
        };

        let span = info_span!("session", session = %Uuid::new_v4());
        async {
            info!(%tap, "session started");
            let outcome = match self.session(&tap, shutdown).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let Some(code) = e.abort_code() else {
                        return Err(e);
                    };
                    warn!(%code, error = %e, "session aborted");
                    self.abort(code, shutdown).await;
                    CycleOutcome::Aborted(code)
                }
            };
            info!(?outcome, "session ended");
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    // ── Stages ───────────────────────────────────────────────────

    async fn await_tap(&self, shutdown: &CancellationToken) -> Result<Option<String>, CoreError> {
        let reader = CardReader::new(
            self.registry.link(&self.config.roles.card_reader).await?,
            self.config.timing.request_timeout,
        );

        debug!("waiting for card tap");
        loop {
            match reader.poll_tap().await {
                Ok(Some(tap)) => return Ok(Some(tap)),
                Ok(None) => {}
                // Nobody is being served yet; keep polling.
                Err(e) if !e.is_fatal() => warn!(error = %e, "card reader poll failed"),
                Err(e) => return Err(e),
            }
            if !pause(shutdown, self.config.timing.tap_poll).await {
                return Ok(None);
            }
        }
    }

    async fn session(
        &self,
        tap: &str,
        shutdown: &CancellationToken,
    ) -> Result<CycleOutcome, CoreError> {
        let timing = &self.config.timing;
        let card = parse_tap(tap)?;

        let authorizer = Authorizer::new(
            self.registry.link(&self.config.roles.card_server).await?,
            timing.request_timeout,
        );
        if !authorizer.authorize(card).await? {
            info!(card, "card declined");
            self.presenter.show(AUTH_NO).await?;
            pause(shutdown, timing.decline_dwell).await;
            return Ok(CycleOutcome::Declined);
        }
        info!(card, "card approved");

        // ── Grade selection ──
        let station = Station::new(
            self.registry.link(&self.config.roles.station).await?,
            timing.request_timeout,
        );
        let fuels = station.fuels().await?;
        self.presenter.show(&format!("GRADE_MENU:{}", fuels.csv)).await?;

        let screen = &self.screen;
        let selected = self
            .await_activity("grade-menu", timing.event_poll, shutdown, || async move {
                let event = screen.poll_event().await?;
                Ok::<_, CoreError>(
                    event.and_then(|e| e.strip_prefix(GRADE_SELECTED).map(|f| f.trim().to_owned())),
                )
            })
            .await?;
        let fuel = match selected {
            Wait::Done(fuel) => fuel,
            Wait::Elapsed => return Ok(CycleOutcome::Abandoned),
            Wait::Interrupted => return Ok(CycleOutcome::Interrupted),
        };
        if !fuels.contains(&fuel) {
            return Err(AbortCode::NoSuchFuel.into());
        }
        info!(%fuel, "grade selected");

        // ── Nozzle ──
        let hose = Hose::new(
            self.registry.link(&self.config.roles.hose).await?,
            timing.request_timeout,
        );
        self.presenter.show(&format!("FUEL_SELECTED:{fuel}")).await?;

        let nozzle = &hose;
        let attached = self
            .await_activity("attach-hose", timing.hose_poll, shutdown, || async move {
                Ok::<_, CoreError>(nozzle.status().await?.attached.then_some(()))
            })
            .await?;
        match attached {
            Wait::Done(()) => {}
            Wait::Elapsed => return Ok(CycleOutcome::Abandoned),
            Wait::Interrupted => return Ok(CycleOutcome::Interrupted),
        }

        // ── Fueling setup ──
        let price = fueling::validate_price(station.price(&fuel).await?)?;
        hose.start().await?;

        let outcome = self.fuel(&hose, &fuel, price, shutdown).await;
        // Aborts stop the pump themselves; a fatal error must not leave it armed.
        if outcome.as_ref().is_err_and(CoreError::is_fatal) {
            if let Err(e) = hose.stop().await {
                warn!(error = %e, "stop after fatal error failed");
            }
        }
        outcome
    }

    async fn fuel(
        &self,
        hose: &Hose,
        fuel: &str,
        price: f64,
        shutdown: &CancellationToken,
    ) -> Result<CycleOutcome, CoreError> {
        let status = hose.status().await?;
        let mut delivery = Delivery::for_tank(status.capacity, status.current)?;
        info!(
            %fuel,
            price,
            target = delivery.target(),
            rate = delivery.rate(),
            "fueling started"
        );

        let flow = self.flow_meter().await;
        self.dispense(hose, flow.as_ref(), &mut delivery, price, shutdown)
            .await
    }

    async fn dispense(
        &self,
        hose: &Hose,
        flow: Option<&FlowMeter>,
        delivery: &mut Delivery,
        price: f64,
        shutdown: &CancellationToken,
    ) -> Result<CycleOutcome, CoreError> {
        let timing = &self.config.timing;
        let mut last_tick = Instant::now();
        let mut detach_deadline: Option<Instant> = None;

        loop {
            let status = hose.status().await?;
            if !status.armed {
                info!(gallons = delivery.dispensed(), "pump disarmed externally");
                return Ok(CycleOutcome::Stopped);
            }

            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64() * self.config.sim_speed;
            last_tick = now;

            if status.full {
                delivery.mark_full();
            }
            if status.attached {
                if detach_deadline.take().is_some() {
                    info!(gallons = delivery.dispensed(), "nozzle reattached");
                }
                if !delivery.is_full() {
                    delivery.advance(dt)?;
                }
            } else if !delivery.is_full() {
                let deadline = *detach_deadline.get_or_insert_with(|| {
                    info!(gallons = delivery.dispensed(), "nozzle detached");
                    now + timing.detach_grace
                });
                if now >= deadline {
                    warn!(gallons = delivery.dispensed(), "nozzle not returned in time");
                    hose.stop().await?;
                    return Ok(CycleOutcome::DetachTimeout);
                }
            }

            let (gallons, dollars) = readout(delivery, price);
            self.presenter
                .show(&format!("FUELING_NUM:{gallons},{dollars}"))
                .await?;
            notify(flow, &gallons, status.attached && !delivery.is_full()).await;

            if delivery.is_full() {
                self.presenter
                    .show(&format!("THANK_YOU_NUM:{gallons},{dollars}"))
                    .await?;
                hose.stop().await?;
                pause(shutdown, timing.thank_you_dwell).await;
                notify(flow, &gallons, false).await;

                info!(%gallons, %dollars, "fueling complete");
                return Ok(CycleOutcome::Completed {
                    gallons: delivery.dispensed(),
                    dollars: fueling::cost(delivery.dispensed(), price),
                });
            }

            if !pause(shutdown, timing.fueling_tick).await {
                if let Err(e) = hose.stop().await {
                    warn!(error = %e, "stop on shutdown failed");
                }
                return Ok(CycleOutcome::Interrupted);
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Poll `probe` every `period` under the idle timer until it yields a
    /// value or the inactivity window passes. A value that arrives after the
    /// timer has fired counts as elapsed.
    async fn await_activity<T, F, Fut>(
        &self,
        label: &'static str,
        period: Duration,
        shutdown: &CancellationToken,
        mut probe: F,
    ) -> Result<Wait<T>, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, CoreError>>,
    {
        // Give up no later than the timer shows WELCOME.
        let deadline = Instant::now() + self.config.timing.idle_window;
        self.idle.start(label).await;

        let waited = loop {
            match probe().await {
                Ok(Some(value)) => break Ok(Wait::Done(value)),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            if Instant::now() >= deadline {
                info!(label, "customer inactive, abandoning session");
                break Ok(Wait::Elapsed);
            }
            if !pause(shutdown, period).await {
                break Ok(Wait::Interrupted);
            }
        };

        let reason = match &waited {
            Ok(Wait::Done(_)) => "activity",
            Ok(Wait::Elapsed) => "window elapsed",
            Ok(Wait::Interrupted) => "shutdown",
            Err(_) => "error",
        };
        let disarmed = self.idle.cancel(reason).await;
        if !disarmed && matches!(waited, Ok(Wait::Done(_))) {
            // WELCOME is already back on screen; the late answer does not count.
            info!(label, "activity arrived after the idle timer fired");
            return Ok(Wait::Elapsed);
        }
        waited
    }

    /// Show the code, stop the pump, dwell. Every step is best-effort.
    async fn abort(&self, code: AbortCode, shutdown: &CancellationToken) {
        let state: &'static str = code.into();
        if let Err(e) = self.presenter.show(state).await {
            warn!(error = %e, "could not show abort code");
        }

        match self.registry.link(&self.config.roles.hose).await {
            Ok(link) => {
                let hose = Hose::new(link, self.config.timing.request_timeout);
                if let Err(e) = hose.stop().await {
                    warn!(error = %e, "stop after abort failed");
                }
            }
            Err(e) => warn!(error = %e, "hose unavailable for stop"),
        }

        pause(shutdown, self.config.timing.abort_dwell).await;
    }

    async fn flow_meter(&self) -> Option<FlowMeter> {
        match self.registry.link(&self.config.roles.flow_meter).await {
            Ok(link) => Some(FlowMeter::new(link, self.config.timing.request_timeout)),
            Err(e) => {
                warn!(error = %e, "flow meter unavailable");
                None
            }
        }
    }
}

impl std::fmt::Debug for TransactionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionController")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Card number from a tap payload.
fn parse_tap(tap: &str) -> Result<i64, AbortCode> {
    let card = tap.trim().parse::<i64>().map_err(|_| AbortCode::BadTap)?;
    if card < 0 {
        return Err(AbortCode::NegTap);
    }
    Ok(card)
}

fn readout(delivery: &Delivery, price: f64) -> (String, String) {
    let gallons = delivery.dispensed();
    (
        fueling::format_gallons(gallons),
        fueling::format_usd(fueling::cost(gallons, price)),
    )
}

async fn notify(flow: Option<&FlowMeter>, gallons: &str, flowing: bool) {
    let Some(flow) = flow else {
        return;
    };
    if let Err(e) = flow.update(gallons, flowing).await {
        debug!(error = %e, "flow meter update dropped");
    }
}

/// Sleep for `period`. Returns `false` if shutdown came first.
async fn pause(shutdown: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(period) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tap_digits() {
        assert_eq!(parse_tap("4"), Ok(4));
        assert_eq!(parse_tap(" 12 "), Ok(12));
        assert_eq!(parse_tap("-3"), Err(AbortCode::NegTap));
        assert_eq!(parse_tap("x"), Err(AbortCode::BadTap));
        assert_eq!(parse_tap(""), Err(AbortCode::BadTap));
    }

    #[test]
    fn readout_uses_fixed_point() {
        let mut delivery = Delivery::new(11.8, 11.8);
        delivery.advance(1.0).unwrap();
        assert_eq!(
            readout(&delivery, 3.49),
            ("11.800".to_owned(), "41.18".to_owned())
        );
    }
}
