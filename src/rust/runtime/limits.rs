// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Constants
//======================================================================================================================

/// Maximum length of a host name, including names of sub-ordinate modules.
pub const HOST_NAME_MAX_SIZE: usize = 64;

/// Maximum length of a locality domain tag (dotted path from the root).
pub const DOMAIN_TAG_MAX_SIZE: usize = 64;
