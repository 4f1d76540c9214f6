mod dvs_facade;
mod host_facade;
mod task_facade;
mod vm_facade;

// -----------------------------------------------------------------------------

mod helpers;
