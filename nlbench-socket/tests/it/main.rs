mod deferred;
mod overrun;
mod requests;
