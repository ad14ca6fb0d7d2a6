// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// The management and printing operations a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Submit a job with one document in one message.
    PrintJob,
    /// Check whether the job would be accepted, without queueing it.
    ValidateJob,
    /// Create a pending, document-less job.
    CreateJob,
    /// Attach a document to a created job.
    SendDocument,
    CancelJob,
    GetJobAttributes,
    GetJobs,
    GetPrinterAttributes,
    GetPrinters,
    GetClasses,
    GetDefault,
    AddPrinter,
    AddClass,
    DeletePrinter,
    DeleteClass,
    SetDefault,
    /// Toggle accepting on.
    EnablePrinter,
    /// Toggle accepting off; in-flight jobs are unaffected.
    DisablePrinter,
    /// Force state = stopped.
    PausePrinter,
    /// Leave stopped; the scheduler re-evaluates the queue.
    ResumePrinter,
    HoldJob,
    ReleaseJob,
    /// Return a completed job to pending.
    RestartJob,
    /// Mutate priority or hold-until.
    SetJobAttributes,
}

impl Operation {
    /// Operations that mutate destinations or the default; these require
    /// administrative authorization.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Operation::AddPrinter
                | Operation::AddClass
                | Operation::DeletePrinter
                | Operation::DeleteClass
                | Operation::SetDefault
                | Operation::EnablePrinter
                | Operation::DisablePrinter
                | Operation::PausePrinter
                | Operation::ResumePrinter
        )
    }
}

spool_core::simple_display! {
    Operation {
        PrintJob => "print-job",
        ValidateJob => "validate-job",
        CreateJob => "create-job",
        SendDocument => "send-document",
        CancelJob => "cancel-job",
        GetJobAttributes => "get-job-attributes",
        GetJobs => "get-jobs",
        GetPrinterAttributes => "get-printer-attributes",
        GetPrinters => "get-printers",
        GetClasses => "get-classes",
        GetDefault => "get-default",
        AddPrinter => "add-printer",
        AddClass => "add-class",
        DeletePrinter => "delete-printer",
        DeleteClass => "delete-class",
        SetDefault => "set-default",
        EnablePrinter => "enable-printer",
        DisablePrinter => "disable-printer",
        PausePrinter => "pause-printer",
        ResumePrinter => "resume-printer",
        HoldJob => "hold-job",
        ReleaseJob => "release-job",
        RestartJob => "restart-job",
        SetJobAttributes => "set-job-attributes",
    }
}
