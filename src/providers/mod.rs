pub mod coindesk;

pub use coindesk::CoindeskClient;
