#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Open,
    Ready,
    Closing,
    Closed,
}
