mod items;
mod scan_sessions;
