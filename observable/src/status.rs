use crate::{
    config::ObserveConfig,
    error::SourceError,
    first_emission::{FirstEmission, FirstEmissionOutcome},
    subscription::SharedSubscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Loading,
    Error,
    Success,
}

/// What a consumer renders from a subscription
#[derive(Debug, Clone)]
pub struct ObservableStatus<T> {
    pub status: Status,
    pub has_emitted: bool,
    pub is_complete: bool,
    /// The latest value, or the initial data if nothing has arrived yet
    pub data: Option<T>,
    pub error: Option<SourceError>,
    pub first_emission: FirstEmission,
}

impl<T> ObservableStatus<T> {
    /// Still loading because the first-emission timeout elapsed, not because the source
    /// is known to be about to emit
    pub fn timed_out(&self) -> bool {
        self.status == Status::Loading && self.first_emission.outcome() == Some(FirstEmissionOutcome::TimedOut)
    }
}

/// Either render now, or suspend until the token settles and then derive again
#[derive(Debug, Clone)]
pub enum Observation<T> {
    Suspended(FirstEmission),
    Ready(ObservableStatus<T>),
}

impl<T> Observation<T> {
    pub fn is_suspended(&self) -> bool { matches!(self, Observation::Suspended(_)) }

    pub fn ready(self) -> Option<ObservableStatus<T>> {
        match self {
            Observation::Ready(status) => Some(status),
            Observation::Suspended(_) => None,
        }
    }
}

/// Derive the status of `subscription` as seen by a consumer with `config`
pub fn derive<T>(subscription: &SharedSubscription<T>, config: &ObserveConfig<T>) -> Observation<T>
where T: Clone + Send + Sync + 'static {
    let snapshot = subscription.snapshot();
    let data = snapshot.latest.or_else(|| config.initial_data.clone());
    project(snapshot.has_emitted, snapshot.has_error, snapshot.is_complete, data, snapshot.error, subscription.first_emission(), config)
}

/// The status rules, given the subscription flags and whatever data the consumer holds
pub(crate) fn project<T>(
    has_emitted: bool,
    has_error: bool,
    is_complete: bool,
    data: Option<T>,
    error: Option<SourceError>,
    first_emission: FirstEmission,
    config: &ObserveConfig<T>,
) -> Observation<T> {
    // once the token has settled (error or timeout) there is nothing left to wait for
    if config.suspense && !has_emitted && !has_error && !config.has_initial_data() && !first_emission.is_settled() {
        return Observation::Suspended(first_emission);
    }

    let status = if has_error {
        Status::Error
    } else if has_emitted || config.has_initial_data() {
        Status::Success
    } else {
        Status::Loading
    };

    Observation::Ready(ObservableStatus { status, has_emitted, is_complete, data, error, first_emission })
}
